#![forbid(unsafe_code)]

// Native-only tool; keep a stub so wasm32 workspace builds still link.
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::path::PathBuf;
    use std::time::Duration;

    use anyhow::{Context, Result};
    use clap::Parser;
    use tether_exit::{CpuId, GuestAddr};
    use tether_harness::{Harness, HarnessConfig, Stop};
    use tether_mb::{Vm, VmConfig};
    use tracing::info;

    #[derive(Debug, Parser)]
    #[command(about = "Run a MicroBlaze image until it reaches a breakpoint or synchronization point")]
    pub struct Args {
        /// Raw big-endian image to load into guest RAM.
        #[arg(long)]
        image: PathBuf,

        /// Guest address the image is loaded at.
        #[arg(long, default_value = "0", value_parser = parse_addr)]
        load_addr: u32,

        /// Initial PC of every vCPU. Defaults to `--load-addr`.
        #[arg(long, value_parser = parse_addr)]
        entry: Option<u32>,

        /// Set a breakpoint (repeatable). Accepts `0x`-prefixed hex or decimal.
        #[arg(long = "break", value_parser = parse_addr)]
        breakpoints: Vec<u32>,

        /// Number of vCPUs.
        #[arg(long, default_value_t = 1)]
        cpus: usize,

        /// Guest RAM size in KiB.
        #[arg(long, default_value_t = 64)]
        ram: u32,

        /// Stop a run that has not exited after N milliseconds of host time.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Stop a run after N guest instructions.
        #[arg(long)]
        max_insts: Option<u64>,

        /// Keep resuming until this many exits have been reported.
        #[arg(long, default_value_t = 1)]
        max_exits: usize,

        /// Resume at the breakpoint itself instead of stepping over it.
        #[arg(long)]
        no_step_over: bool,
    }

    fn parse_addr(s: &str) -> Result<u32, String> {
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => s.parse(),
        };
        parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
    }

    pub fn main() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();

        let args = Args::parse();

        let image = std::fs::read(&args.image)
            .with_context(|| format!("failed to read {}", args.image.display()))?;
        let ram_size = args.ram.checked_mul(1024).context("RAM size overflow")?;

        let mut vm = Vm::new(VmConfig {
            cpu_count: args.cpus,
            ram_size,
            ..VmConfig::default()
        })?;
        vm.load(args.load_addr, &image)
            .context("image does not fit in guest RAM")?;
        let entry = GuestAddr::from(args.entry.unwrap_or(args.load_addr));
        for index in 0..vm.cpu_count() {
            vm.resume_at(CpuId(index), entry)?;
        }
        info!(
            bytes = image.len(),
            cpus = args.cpus,
            "loaded image at {:#x}, entry {entry:#x}",
            args.load_addr
        );

        let mut harness = Harness::new(
            vm,
            HarnessConfig {
                timeout: args.timeout_ms.map(Duration::from_millis),
                max_insts: args.max_insts.unwrap_or(u64::MAX),
                step_over_breakpoints: !args.no_step_over,
                ..HarnessConfig::default()
            },
        );
        for addr in &args.breakpoints {
            harness.set_breakpoint(GuestAddr::from(*addr));
        }

        for _ in 0..args.max_exits {
            match harness.run()? {
                Stop::Exit(reason) => println!("exit: {reason}"),
                Stop::Timeout(reason) => {
                    println!("timeout: {reason}");
                    break;
                }
                Stop::BudgetExhausted { executed } => {
                    println!("budget exhausted after {executed} instructions");
                    break;
                }
                Stop::IllegalInstruction { cpu, pc, word } => {
                    println!("illegal instruction {word:#010x} at {pc:#x} on {cpu}");
                    break;
                }
            }
        }

        Ok(())
    }

}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}

use std::time::Duration;

use tether_exit::{CpuId, ExitReasonKind, EXCP_EXIT};
use tether_mb::asm;
use tether_mb::config::DEFAULT_SYNC_BACKDOOR_WORD;
use tether_mb::{RunExit, StepExit, Vm, VmConfig, VmError};

const CPU0: CpuId = CpuId(0);

fn vm_with_program(config: VmConfig, words: &[u32]) -> Vm {
    let mut vm = Vm::new(config).unwrap();
    vm.load(0, &asm::to_bytes(words)).unwrap();
    vm
}

/// `r3 += 1` forever.
fn counting_loop() -> Vec<u32> {
    vec![asm::addik(3, 3, 1), asm::nop(), asm::bri(-8)]
}

#[test]
fn breakpoint_stops_before_executing_the_instruction() {
    let mut vm = vm_with_program(VmConfig::default(), &counting_loop());
    let ctx = vm.exit_context().clone();
    ctx.breakpoints().insert(0x4);

    let exit = vm.run(CPU0, 1_000).unwrap();
    let RunExit::Exit { signal, executed } = exit else {
        panic!("expected an exit, got {exit:?}");
    };
    assert_eq!(signal.code(), EXCP_EXIT);
    assert_eq!(signal.cpu(), CPU0);
    assert_eq!(executed, 1);

    let reason = ctx.get_exit_reason().unwrap();
    assert_eq!(reason.kind, ExitReasonKind::Breakpoint { addr: 0x4 });
    assert_eq!(reason.resume_address, 0x4);
    assert_eq!(ctx.last_exit_cpu(), Some(CPU0));
    assert_eq!(vm.cpu(CPU0).unwrap().pc, 0x4);
    assert_eq!(vm.cpu(CPU0).unwrap().gpr(3), 1);
}

#[test]
fn breakpoint_inserted_after_translation_still_fires() {
    let mut vm = vm_with_program(VmConfig::default(), &counting_loop());
    let ctx = vm.exit_context().clone();

    assert_eq!(vm.run(CPU0, 30).unwrap(), RunExit::Completed { executed: 30 });
    assert!(vm.cache().contains(0x0));

    ctx.breakpoints().insert(0x4);
    assert!(!vm.cache().contains(0x0), "covering block must be dropped");

    ctx.signal_vm_start();
    let exit = vm.run(CPU0, 30).unwrap();
    assert!(matches!(exit, RunExit::Exit { .. }), "{exit:?}");
    assert_eq!(
        ctx.get_exit_reason().unwrap().kind,
        ExitReasonKind::Breakpoint { addr: 0x4 }
    );
}

#[test]
fn removed_breakpoint_no_longer_fires() {
    let mut vm = vm_with_program(VmConfig::default(), &counting_loop());
    let ctx = vm.exit_context().clone();
    ctx.breakpoints().insert(0x4);

    assert!(matches!(vm.run(CPU0, 30).unwrap(), RunExit::Exit { .. }));
    assert!(ctx.breakpoints().remove(0x4));

    ctx.signal_vm_start();
    assert_eq!(vm.run(CPU0, 30).unwrap(), RunExit::Completed { executed: 30 });
    assert_eq!(ctx.get_exit_reason(), None);
}

#[test]
fn resuming_verbatim_retriggers_and_single_step_steps_over() {
    let mut vm = vm_with_program(VmConfig::default(), &counting_loop());
    let ctx = vm.exit_context().clone();
    ctx.breakpoints().insert(0x4);

    assert!(matches!(vm.run(CPU0, 100).unwrap(), RunExit::Exit { .. }));
    let resume = ctx.get_exit_reason().unwrap().resume_address;

    ctx.signal_vm_start();
    vm.resume_at(CPU0, resume).unwrap();
    let exit = vm.run(CPU0, 100).unwrap();
    assert!(matches!(exit, RunExit::Exit { executed: 0, .. }), "{exit:?}");

    ctx.signal_vm_start();
    assert_eq!(vm.single_step(CPU0).unwrap(), StepExit::Continue);
    assert_eq!(vm.cpu(CPU0).unwrap().pc, 0x8);

    // One full loop iteration later the breakpoint fires again.
    let exit = vm.run(CPU0, 100).unwrap();
    assert!(matches!(exit, RunExit::Exit { executed: 2, .. }), "{exit:?}");
    assert_eq!(vm.cpu(CPU0).unwrap().gpr(3), 2);
}

#[test]
fn sync_backdoor_exits_after_the_instruction() {
    let program = [
        asm::addik(3, 0, 7),
        DEFAULT_SYNC_BACKDOOR_WORD,
        asm::addik(4, 0, 1),
        asm::bri(0),
    ];
    let mut vm = vm_with_program(VmConfig::default(), &program);
    let ctx = vm.exit_context().clone();

    let exit = vm.run(CPU0, 100).unwrap();
    assert!(matches!(exit, RunExit::Exit { executed: 2, .. }), "{exit:?}");

    let reason = ctx.get_exit_reason().unwrap();
    assert_eq!(reason.kind, ExitReasonKind::SyncBackdoor);
    assert_eq!(reason.resume_address, 0x8);
    assert_eq!(reason.breakpoint_addr(), None);
    assert_eq!(vm.cpu(CPU0).unwrap().pc, 0x8);

    ctx.signal_vm_start();
    assert_eq!(vm.run(CPU0, 10).unwrap(), RunExit::Completed { executed: 10 });
    assert_eq!(vm.cpu(CPU0).unwrap().gpr(4), 1);
}

#[test]
fn single_step_honours_the_backdoor() {
    let mut vm = vm_with_program(VmConfig::default(), &[DEFAULT_SYNC_BACKDOOR_WORD]);
    let ctx = vm.exit_context().clone();

    let StepExit::Exit(signal) = vm.single_step(CPU0).unwrap() else {
        panic!("expected backdoor exit");
    };
    assert_eq!(signal.cpu(), CPU0);
    assert_eq!(ctx.get_exit_reason().unwrap().resume_address, 0x4);
}

#[test]
fn exit_asap_before_run_exits_immediately() {
    let mut vm = vm_with_program(VmConfig::default(), &counting_loop());
    let ctx = vm.exit_context().clone();
    ctx.request_exit_asap();

    let exit = vm.run(CPU0, 100).unwrap();
    assert!(matches!(exit, RunExit::Exit { executed: 0, .. }), "{exit:?}");
    let reason = ctx.get_exit_reason().unwrap();
    assert_eq!(reason.kind, ExitReasonKind::Requested);
    assert_eq!(reason.resume_address, 0x0);

    ctx.signal_vm_start();
    assert!(!ctx.exit_asap());
    assert_eq!(vm.run(CPU0, 10).unwrap(), RunExit::Completed { executed: 10 });
}

#[test]
fn exit_asap_from_another_thread_stops_an_infinite_loop() {
    let mut vm = vm_with_program(VmConfig::default(), &[asm::bri(0)]);
    let ctx = vm.exit_context().clone();

    let runner = std::thread::spawn(move || {
        let exit = vm.run(CPU0, u64::MAX).unwrap();
        (vm, exit)
    });
    std::thread::sleep(Duration::from_millis(20));
    ctx.request_exit_asap();

    let (vm, exit) = runner.join().unwrap();
    assert!(matches!(exit, RunExit::Exit { .. }), "{exit:?}");
    let reason = ctx.get_exit_reason().unwrap();
    assert_eq!(reason.kind, ExitReasonKind::Requested);
    assert_eq!(reason.resume_address, u64::from(vm.cpu(CPU0).unwrap().pc));
}

#[test]
fn breakpoint_inserted_while_running_is_hit() {
    let mut vm = vm_with_program(VmConfig::default(), &counting_loop());
    let ctx = vm.exit_context().clone();

    let runner = std::thread::spawn(move || vm.run(CPU0, u64::MAX).unwrap());
    std::thread::sleep(Duration::from_millis(20));
    assert!(ctx.breakpoints().insert(0x8));

    let exit = runner.join().unwrap();
    assert!(matches!(exit, RunExit::Exit { .. }), "{exit:?}");
    assert_eq!(
        ctx.get_exit_reason().unwrap().kind,
        ExitReasonKind::Breakpoint { addr: 0x8 }
    );
}

#[test]
fn round_robin_reports_the_triggering_cpu() {
    // cpu0 spins at 0x0; cpu1 starts at 0x4 and hits the backdoor.
    let program = [asm::bri(0), asm::nop(), DEFAULT_SYNC_BACKDOOR_WORD, asm::bri(0)];
    let config = VmConfig {
        cpu_count: 2,
        ..VmConfig::default()
    };
    let mut vm = vm_with_program(config, &program);
    vm.resume_at(CpuId(1), 0x4).unwrap();
    let ctx = vm.exit_context().clone();

    let exit = vm.run_round_robin(8, 1_000).unwrap();
    let RunExit::Exit { signal, executed } = exit else {
        panic!("expected an exit, got {exit:?}");
    };
    assert_eq!(signal.cpu(), CpuId(1));
    assert_eq!(executed, 8 + 2);
    assert_eq!(ctx.last_exit_cpu(), Some(CpuId(1)));
    assert_eq!(ctx.get_exit_reason().unwrap().resume_address, 0xC);
    assert_eq!(vm.cpu(CpuId(0)).unwrap().pc, 0x0);
}

#[test]
fn illegal_instruction_is_reported_without_an_exit() {
    let mut vm = vm_with_program(VmConfig::default(), &[asm::nop(), 0xFFFF_FFFF]);
    let exit = vm.run(CPU0, 10).unwrap();
    assert_eq!(
        exit,
        RunExit::IllegalInstruction {
            cpu: CPU0,
            pc: 0x4,
            word: 0xFFFF_FFFF,
            executed: 1
        }
    );
    assert_eq!(vm.exit_context().get_exit_reason(), None);
}

#[test]
fn fetch_outside_ram_is_an_error() {
    let mut vm = Vm::new(VmConfig::default()).unwrap();
    vm.resume_at(CPU0, 0x10_0000).unwrap();
    assert!(matches!(vm.run(CPU0, 1), Err(VmError::Mem(_))));
}

#[test]
fn invalid_cpu_is_rejected() {
    let mut vm = Vm::new(VmConfig::default()).unwrap();
    assert_eq!(vm.run(CpuId(3), 1), Err(VmError::InvalidCpu(CpuId(3))));
    assert_eq!(
        vm.resume_at(CPU0, 1 << 40),
        Err(VmError::AddressOutOfRange(1 << 40))
    );
}

#[test]
fn loading_code_flushes_translations() {
    let mut vm = vm_with_program(VmConfig::default(), &counting_loop());
    vm.run(CPU0, 3).unwrap();
    assert!(vm.cache().contains(0x0));

    vm.load(0, &asm::to_bytes(&[asm::addik(3, 3, 100)])).unwrap();
    assert!(vm.cache().is_empty());
}

#[test]
#[should_panic(expected = "still in flight")]
fn exiting_again_without_vm_start_is_fatal() {
    let mut vm = vm_with_program(VmConfig::default(), &counting_loop());
    vm.exit_context().breakpoints().insert(0x0);
    let _ = vm.run(CPU0, 10);
    let _ = vm.run(CPU0, 10);
}

use std::sync::Arc;

use tether_exit::{CpuId, ExitContext, ExitReason, ExitReasonKind, NoopInvalidator, EXCP_EXIT};

fn ctx() -> ExitContext {
    ExitContext::new(Arc::new(NoopInvalidator))
}

#[test]
fn nothing_in_flight_reads_as_none() {
    let ctx = ctx();
    assert_eq!(ctx.get_exit_reason(), None);
    assert_eq!(ctx.last_exit_cpu(), None);
    assert!(!ctx.exit_expected());
}

#[test]
fn breakpoint_exit_round_trip() {
    let ctx = ctx();
    let cpu = CpuId(1);

    let signal = ctx.request_breakpoint_exit(cpu, 0x1000);
    assert_eq!(signal.cpu(), cpu);
    assert_eq!(signal.code(), EXCP_EXIT);

    let reason = ctx.get_exit_reason().expect("exit in flight");
    assert_eq!(reason.kind, ExitReasonKind::Breakpoint { addr: 0x1000 });
    assert_eq!(reason.triggering_cpu, cpu);
    assert_eq!(reason.resume_address, 0x1000);
    assert_eq!(reason.breakpoint_addr(), Some(0x1000));
    assert_eq!(ctx.last_exit_cpu(), Some(cpu));

    ctx.signal_vm_start();
    assert_eq!(ctx.get_exit_reason(), None);
    assert_eq!(ctx.last_exit_cpu(), None);
}

#[test]
fn sync_backdoor_has_no_breakpoint_payload() {
    let ctx = ctx();
    let _signal = ctx.request_sync_backdoor_exit(CpuId(0), 0x2004);

    let reason = ctx.get_exit_reason().expect("exit in flight");
    assert_eq!(reason, ExitReason::sync_backdoor(CpuId(0), 0x2004));
    assert_eq!(reason.kind, ExitReasonKind::SyncBackdoor);
    assert_eq!(reason.breakpoint_addr(), None);
}

#[test]
fn exit_asap_lifecycle() {
    let ctx = ctx();
    assert!(!ctx.exit_asap());

    ctx.request_exit_asap();
    assert!(ctx.exit_asap());
    // Requesting twice is harmless.
    ctx.request_exit_asap();
    assert!(ctx.exit_asap());

    ctx.signal_vm_start();
    assert!(!ctx.exit_asap());
}

#[test]
fn exit_asap_can_be_requested_from_another_thread() {
    let ctx = Arc::new(ctx());
    let remote = ctx.clone();
    std::thread::spawn(move || remote.request_exit_asap())
        .join()
        .unwrap();
    assert!(ctx.exit_asap());
}

#[test]
fn requested_exit_resumes_at_next_pc() {
    let ctx = ctx();
    let _signal = ctx.request_asap_exit(CpuId(2), 0x3000);
    let reason = ctx.get_exit_reason().unwrap();
    assert_eq!(reason.kind, ExitReasonKind::Requested);
    assert_eq!(reason.resume_address, 0x3000);
    assert_eq!(ctx.last_exit_cpu(), Some(CpuId(2)));
}

#[test]
fn sync_exit_cpu_re_raises_for_the_exiting_cpu() {
    let ctx = ctx();
    let _first = ctx.request_breakpoint_exit(CpuId(3), 0x40);
    let again = ctx.sync_exit_cpu();
    assert_eq!(again.cpu(), CpuId(3));
    assert_eq!(again.code(), EXCP_EXIT);
}

#[test]
#[should_panic(expected = "no exit in flight")]
fn sync_exit_cpu_without_exit_is_fatal() {
    let ctx = ctx();
    let _ = ctx.sync_exit_cpu();
}

#[test]
#[should_panic(expected = "still in flight")]
fn overwriting_unconsumed_exit_is_fatal() {
    let ctx = ctx();
    let _a = ctx.request_breakpoint_exit(CpuId(0), 0x100);
    let _b = ctx.request_sync_backdoor_exit(CpuId(1), 0x204);
}

#[test]
fn new_exit_allowed_after_vm_start() {
    let ctx = ctx();
    let _a = ctx.request_breakpoint_exit(CpuId(0), 0x100);
    ctx.signal_vm_start();
    let _b = ctx.request_sync_backdoor_exit(CpuId(1), 0x204);
    assert_eq!(ctx.last_exit_cpu(), Some(CpuId(1)));
}

#[test]
fn registry_scenario_feeds_exit() {
    let ctx = ctx();
    let bps = ctx.breakpoints();
    bps.insert(0x400);
    bps.insert(0x800);
    assert!(bps.contains(0x400));
    assert!(!bps.contains(0xC00));

    bps.remove(0x400);
    assert!(!bps.contains(0x400));
    assert_eq!(bps.addresses(), vec![0x800]);

    // What an engine does when it reaches 0x800.
    assert!(bps.contains(0x800));
    let _signal = ctx.request_breakpoint_exit(CpuId(0), 0x800);
    let reason = ctx.get_exit_reason().unwrap();
    assert_eq!(reason.kind, ExitReasonKind::Breakpoint { addr: 0x800 });
    assert_eq!(reason.resume_address, 0x800);
}

#[test]
fn display_names_the_cpu_and_addresses() {
    let bp = ExitReason::breakpoint(CpuId(1), 0x800);
    assert_eq!(bp.to_string(), "cpu1 hit breakpoint 0x800 (resume at 0x800)");

    let sync = ExitReason::sync_backdoor(CpuId(0), 0x2004);
    assert_eq!(sync.to_string(), "cpu0 exited (sync-backdoor), resume at 0x2004");
}

use super::*;
use crate::error::Error;

#[test]
fn queues_are_handed_out_round_robin() {
    let context = DeviceContext::host(3);
    let queues = context.queues();
    assert_eq!(queues.len(), 3);
    let ids = (0..6).map(|_| queues.next().id()).collect::<Vec<_>>();
    assert_eq!(ids, vec![0, 1, 2, 0, 1, 2]);
}

#[test]
fn zero_queues_still_opens_one() {
    let context = DeviceContext::host(0);
    assert_eq!(context.queues().len(), 1);
    assert!(context.queues().get(1).is_err());
}

#[test]
fn kernel_compilation_is_cached() {
    let context = DeviceContext::host(1);
    let source = Program::Matrix.source();
    let first = context.compile_kernel(source, "gemm_batched").unwrap();
    let compilations = context.compilations();
    let second = context.compile_kernel(source, "gemm_batched").unwrap();
    assert_eq!(first, second);
    assert_eq!(context.compilations(), compilations);

    // Another kernel of the same program reuses the compiled program.
    context.compile_kernel(source, "transpose").unwrap();
    assert_eq!(context.compilations(), compilations);
    context
        .compile_kernel(Program::Pooling.source(), "max_pool_forward")
        .unwrap();
    assert_eq!(context.compilations(), compilations + 1);
}

#[test]
fn undeclared_kernel_is_rejected() {
    let context = DeviceContext::host(1);
    let result = context.compile_kernel(Program::Matrix.source(), "conv_forward");
    assert!(match result {
        Err(Error::Device(_)) => true,
        _ => false,
    });
}

#[test]
fn required_gpu_is_not_found_on_the_host() {
    if available_platforms().iter().any(|p| p.has(Capability::Gpu)) {
        return;
    }
    let result = select_platform(&PlatformCriteria::new(DevicePreference::RequireGpu));
    assert!(match result {
        Err(Error::NoCompatibleDevice(_)) => true,
        _ => false,
    });
}

#[test]
fn host_platform_computes_floats() {
    let platform = select_platform(&PlatformCriteria::new(DevicePreference::Host)).unwrap();
    assert!(platform.has(Capability::FloatCompute));
}

#[test]
fn launches_are_counted_per_queue() {
    let context = DeviceContext::host(2);
    let (a, b) = (context.queues().get(0).unwrap(), context.queues().get(1).unwrap());
    let buffer = DeviceBuffer::zeros(4, a).unwrap();
    let call = KernelCall::new(Program::Matrix, "fill")
        .global([4, 1, 1])
        .buffer(&buffer, 0, 4)
        .float(2.5)
        .uint(4);
    a.run(call, true).unwrap();
    assert_eq!((a.submitted(), b.submitted()), (1, 0));
    assert_eq!(buffer.read(0, 4, a).unwrap(), vec![2.5; 4]);
}

#[test]
fn device_preferences_parse() {
    use crate::config::{parse_preference, DeviceConfig};
    assert_eq!(parse_preference(" GPU ").unwrap(), DevicePreference::PreferGpu);
    assert_eq!(parse_preference("cpu").unwrap(), DevicePreference::RequireCpu);
    assert!(parse_preference("tpu").is_err());

    let config = DeviceConfig::default();
    let context = DeviceContext::from_config(&config).unwrap();
    assert!(context.platform().is_host());
    assert_eq!(context.queues().len(), config.queue_count);
}

#[test]
fn extra_capabilities_narrow_the_selection() {
    let criteria =
        PlatformCriteria::new(DevicePreference::Host).with_capability(Capability::Gpu);
    assert_eq!(criteria.capabilities, vec![Capability::FloatCompute, Capability::Gpu]);
    assert!(match select_platform(&criteria) {
        Err(Error::NoCompatibleDevice(_)) => true,
        _ => false,
    });
}

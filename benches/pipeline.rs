//! Dispatch kernel micro-benchmarks: accepted fan-out versus policy
//! rejection, without any transport in the way.

use criterion::{criterion_group, criterion_main, Criterion};

use mavlink_gateway::codec::{CommandLong, Heartbeat, MAV_CMD_DO_FENCE_ENABLE};
use mavlink_gateway::pipeline::Pipeline;
use mavlink_gateway::transport::{hook_loopback_sink, Message, SinkId, SourceId};

fn bench_push(c: &mut Criterion) {
    let mut pipeline = Pipeline::new();
    let legacy = hook_loopback_sink(&mut pipeline, SinkId::Legacy);
    let enclave = hook_loopback_sink(&mut pipeline, SinkId::Enclave);
    let vmc = hook_loopback_sink(&mut pipeline, SinkId::Vmc);
    pipeline.connect();

    let heartbeat = Message::new(
        Heartbeat {
            custom_mode: 1,
            mav_type: 2,
            autopilot: 3,
            base_mode: 81,
            system_status: 4,
            mavlink_version: 3,
        }
        .encode(1, 1, 0),
        SourceId::Vmc,
    );

    c.bench_function("push accepted heartbeat (2-way fan-out)", |b| {
        b.iter(|| {
            let mut msg = heartbeat.clone();
            pipeline.push(&mut msg).unwrap();
            while legacy.try_recv().is_some() {}
            while enclave.try_recv().is_some() {}
        })
    });

    let rejected = Message::new(
        CommandLong {
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
            command: MAV_CMD_DO_FENCE_ENABLE,
            target_system: 1,
            target_component: 0,
            confirmation: 0,
        }
        .encode(255, 0, 0),
        SourceId::Legacy,
    );

    c.bench_function("push rejected geofence command", |b| {
        b.iter(|| {
            let mut msg = rejected.clone();
            pipeline.push(&mut msg).unwrap();
            while vmc.try_recv().is_some() {}
        })
    });
}

criterion_group!(benches, bench_push);
criterion_main!(benches);

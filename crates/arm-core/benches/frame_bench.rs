//! Criterion benchmarks for the joint frame codec.
//!
//! Dragging one slider produces a frame every debounce window per joint, so
//! encoding must stay negligible next to the 40ms quiet period.
//!
//! Run with:
//! ```bash
//! cargo bench --package arm-core --bench frame_bench
//! ```

use arm_core::{decode_frame, encode_frame, Angle, ArmPose, Joint, JointCommand};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_encode(c: &mut Criterion) {
    let cmd = JointCommand::new(Joint::Shoulder, Angle::clamped(135));
    c.bench_function("encode_frame", |b| b.iter(|| encode_frame(black_box(&cmd))));
}

fn bench_decode(c: &mut Criterion) {
    c.bench_function("decode_frame", |b| {
        b.iter(|| decode_frame(black_box("J 4 135\n")))
    });
}

fn bench_encode_full_pose(c: &mut Criterion) {
    let pose = ArmPose::home();
    c.bench_function("encode_full_pose", |b| {
        b.iter(|| {
            black_box(&pose)
                .commands()
                .map(|cmd| encode_frame(&cmd))
                .collect::<Vec<_>>()
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_encode_full_pose);
criterion_main!(benches);

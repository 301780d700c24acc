//! Run with:
//!   cargo bench --bench invoke_benchmark

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use nativecall::{
    ArgExpectation, Invoker, InvokerCreateInfo, MetaField, NativeDirectory, NativeIdentifier,
    NativeSignature, NativeTable, OutputKind, ReturnKind,
};

const ADD: NativeIdentifier = NativeIdentifier(1);
const FILL: NativeIdentifier = NativeIdentifier(2);
const COUNTER: NativeIdentifier = NativeIdentifier(3);
const UNTYPED: NativeIdentifier = NativeIdentifier(4);

fn create_invoker(strict: bool) -> Invoker {
    let directory = NativeDirectory::from_table([
        (
            ADD,
            NativeSignature::new(
                vec![ArgExpectation::Scalar, ArgExpectation::Scalar],
                ReturnKind::Int32,
            ),
        ),
        (
            FILL,
            NativeSignature::new(
                vec![ArgExpectation::Pointer { min_size: 0 }, ArgExpectation::Scalar],
                ReturnKind::Void,
            ),
        ),
        (
            COUNTER,
            NativeSignature::new(
                vec![ArgExpectation::Pointer { min_size: 4 }],
                ReturnKind::Void,
            ),
        ),
    ]);

    let mut table = NativeTable::new();
    table.register(ADD, |call| {
        call.set_result_i32(call.arg_i32(0).wrapping_add(call.arg_i32(1)));
        Ok(())
    });
    table.register(FILL, |call| {
        let ptr = call.arg_ptr::<u8>(0);
        for i in 0..call.arg(1) as usize {
            unsafe { *ptr.add(i) = i as u8 };
        }
        Ok(())
    });
    table.register(COUNTER, |call| {
        unsafe { *call.arg_ptr::<i32>(0) += 1 };
        Ok(())
    });
    table.register(UNTYPED, |call| {
        call.set_result(call.arg(0));
        Ok(())
    });

    Invoker::new(
        InvokerCreateInfo {
            strict: Some(strict),
            ..Default::default()
        },
        directory,
        table,
    )
}

/// Trivial signature, no pointers: the fast path.
fn bench_trivial(c: &mut Criterion) {
    let invoker = create_invoker(false);
    c.bench_function("trivial_add", |b| {
        b.iter(|| {
            let mut ctx = invoker.begin(ADD);
            ctx.push(black_box(40i32)).expect("push");
            ctx.push(black_box(2i32)).expect("push");
            ctx.invoke().expect("invoke");
            black_box(ctx.results()[0]);
        });
    });
}

/// A pointer of unknown size is copied into the arena and back.
fn bench_isolated_buffer(c: &mut Criterion) {
    let invoker = create_invoker(true);
    let mut buffer = vec![0u8; 1024];
    c.bench_function("isolated_buffer_1k", |b| {
        b.iter(|| {
            let mut ctx = invoker.begin(FILL);
            ctx.push(buffer.as_mut_slice()).expect("push");
            ctx.push(1024i32).expect("push");
            ctx.invoke().expect("invoke");
        });
    });
}

fn bench_output_slot(c: &mut Criterion) {
    let invoker = create_invoker(true);
    c.bench_function("output_slot", |b| {
        b.iter(|| {
            let mut ctx = invoker.begin(COUNTER);
            ctx.push(MetaField::Output(OutputKind::Integer)).expect("push");
            ctx.invoke().expect("invoke");
            black_box(ctx.read_extra_result(0));
        });
    });
}

fn bench_untyped(c: &mut Criterion) {
    let invoker = create_invoker(false);
    c.bench_function("untyped_pass_through", |b| {
        b.iter(|| {
            let mut ctx = invoker.begin(UNTYPED);
            ctx.push(black_box(7i64)).expect("push");
            ctx.invoke().expect("invoke");
            black_box(ctx.results()[0]);
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(50);
    targets = bench_trivial, bench_isolated_buffer, bench_output_slot, bench_untyped
}

criterion_main!(benches);

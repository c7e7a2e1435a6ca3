//! Benchmarks compilation throughput on representative programs (`spec.md`
//! §8's end-to-end scenarios, reused here as load shapes).
//!
//! Grounded on `ouros`'s `benches/arithmetic_non_foldable.rs`: one
//! `criterion` group, one `bench_function` per program shape, each
//! building the IR fresh inside the timed closure so allocation of the
//! block graph itself is measured along with binding/expansion/emission.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use filterc::block::Graph;
use filterc::builder::const_;
use filterc::diag::DepthGuard;
use filterc::lower::{both, call, collect, function, reduce};
use serde_json::json;

fn compile_identity() {
    let mut g = Graph::new();
    let body = filterc::block::Block::empty();
    let outcome = filterc::compile::compile(body, &mut g).unwrap();
    black_box(outcome);
}

fn compile_both_chain() {
    let mut g = Graph::new();
    let mut body = const_(json!(0), &mut g);
    for i in 1..20 {
        let next = const_(json!(i), &mut g);
        body = both(body, next, &mut g);
    }
    let outcome = filterc::compile::compile(body, &mut g).unwrap();
    black_box(outcome);
}

fn compile_collect_of_chain() {
    let mut g = Graph::new();
    let mut body = const_(json!(0), &mut g);
    for i in 1..20 {
        let next = const_(json!(i), &mut g);
        body = both(body, next, &mut g);
    }
    let body = collect(body, &mut g);
    let outcome = filterc::compile::compile(body, &mut g).unwrap();
    black_box(outcome);
}

fn compile_recursive_function_and_call() {
    let mut g = Graph::new();
    let depth = DepthGuard::default();
    let recurse = call("f".into(), vec![], &mut g);
    let def = function("f".into(), vec![], recurse, &mut g, depth).unwrap();
    let def_id = def.first().unwrap();
    let top_call = call("f".into(), vec![], &mut g);
    filterc::bind::bind_references(def_id, top_call, filterc::opcode::OpFlags::NONE, &mut g, depth).unwrap();
    let body = def.join(top_call, &mut g);
    let outcome = filterc::compile::compile(body, &mut g).unwrap();
    black_box(outcome);
}

fn compile_reduce_over_range() {
    let mut g = Graph::new();
    let depth = DepthGuard::default();
    let mut src = const_(json!(0), &mut g);
    for i in 1..10 {
        let next = const_(json!(i), &mut g);
        src = both(src, next, &mut g);
    }
    let init = const_(json!(0), &mut g);
    let body = const_(json!(1), &mut g);
    let reduced = reduce("x".into(), src, init, body, &mut g, depth).unwrap();
    let outcome = filterc::compile::compile(reduced, &mut g).unwrap();
    black_box(outcome);
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("compile_identity", |b| b.iter(compile_identity));
    c.bench_function("compile_both_chain_20", |b| b.iter(compile_both_chain));
    c.bench_function("compile_collect_of_chain_20", |b| b.iter(compile_collect_of_chain));
    c.bench_function("compile_recursive_function_and_call", |b| b.iter(compile_recursive_function_and_call));
    c.bench_function("compile_reduce_over_range_10", |b| b.iter(compile_reduce_over_range));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

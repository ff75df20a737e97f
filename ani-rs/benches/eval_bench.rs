use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use ani::script::{compile, Program, ScriptThread, SimpleRegistry, SwitchPolicy};

const LOOP: &str = "int s = 0; for (int i = 0; i < 1000; i++) s += i * 3 % 7;";
const MATRIX: &str = "matrix<3,3> m; vector<3> v = <1, 2, 3>; \
                      for (int i = 0; i < 200; i++) { m[i % 3][(i + 1) % 3] += 0.5; v = m * v / 10; }";

fn compiled(src: &str) -> (Rc<Program>, Rc<SimpleRegistry>) {
    let mut reg = SimpleRegistry::new();
    let program = compile(src, &mut reg).unwrap();
    (Rc::new(program), Rc::new(reg))
}

fn run(program: &Rc<Program>, reg: &Rc<SimpleRegistry>, switch: SwitchPolicy) -> usize {
    let mut t = ScriptThread::new("bench", Rc::clone(program), reg.clone(), switch);
    let mut slices = 1;
    while !t.exec().is_finished() {
        slices += 1;
    }
    slices
}

fn bench_eval(c: &mut Criterion) {
    let mut g = c.benchmark_group("eval");
    for (name, src) in [("loop", LOOP), ("matrix", MATRIX)] {
        let (program, reg) = compiled(src);

        g.bench_function(format!("{name}_unsliced"), |b| {
            b.iter_batched(SwitchPolicy::never, |p| black_box(run(&program, &reg, p)), BatchSize::SmallInput)
        });
        g.bench_function(format!("{name}_slice_64"), |b| {
            b.iter_batched(|| SwitchPolicy::slice(64), |p| black_box(run(&program, &reg, p)), BatchSize::SmallInput)
        });
        g.bench_function(format!("{name}_every_leaf"), |b| {
            b.iter_batched(SwitchPolicy::every_leaf, |p| black_box(run(&program, &reg, p)), BatchSize::SmallInput)
        });
    }
    g.finish();
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_matrix", |b| {
        b.iter(|| {
            let mut reg = SimpleRegistry::new();
            black_box(compile(black_box(MATRIX), &mut reg).unwrap())
        })
    });
}

criterion_group!(benches, bench_eval, bench_compile);
criterion_main!(benches);

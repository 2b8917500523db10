use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mdimport::memory::{MemoryDispenser, MemoryImport, MetadataModel};
use mdimport::{DifferentialRunner, DualLoader, EnumQuery, Enumerator, Flavor, RunConfig};

fn bench_flat_driver(c: &mut Criterion) {
    let mut group = c.benchmark_group("mdimport/flat");
    let import = MemoryImport::new(MetadataModel::synthetic(2_000, 0, 0, 0));

    for capacity in [1usize, 16, 256] {
        group.bench_with_input(BenchmarkId::new("type_defs", capacity), &capacity, |b, &capacity| {
            let driver = Enumerator::with_capacity(&import, capacity);
            b.iter(|| black_box(driver.collect(EnumQuery::TypeDefs).unwrap()));
        });
    }

    group.finish();
}

fn bench_hierarchy(c: &mut Criterion) {
    let mut group = c.benchmark_group("mdimport/hierarchy");
    let import = MemoryImport::new(MetadataModel::synthetic(200, 8, 3, 4));
    let driver = Enumerator::new(&import);

    group.bench_function("type_hierarchy", |b| {
        b.iter(|| black_box(driver.type_hierarchy().unwrap()));
    });

    group.bench_function("members", |b| {
        b.iter(|| black_box(driver.members().unwrap()));
    });

    group.finish();
}

fn bench_differential_run(c: &mut Criterion) {
    let model = MetadataModel::synthetic(100, 6, 2, 3);
    let baseline = MemoryDispenser::new(Flavor::Baseline, model.clone());
    let current = MemoryDispenser::new(Flavor::Current, model);
    let loader = DualLoader::new(&baseline, &current);
    let runner = DifferentialRunner::new(RunConfig::default());

    c.bench_function("mdimport/differential_run", |b| {
        b.iter(|| black_box(runner.run_image("synthetic", &loader, &[])));
    });
}

criterion_group!(benches, bench_flat_driver, bench_hierarchy, bench_differential_run);
criterion_main!(benches);

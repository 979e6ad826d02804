use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use shelf::{KvsEngine, LocalLock, FileBackend, Shelf, ShelfConfig};

fn config(dir: &TempDir) -> ShelfConfig {
    ShelfConfig::new()
        .with_store_path(dir.path().join("data.db"))
        .with_poll_interval(Duration::from_millis(1))
}

fn seeded_shelf(dir: &TempDir) -> Shelf {
    let shelf = Shelf::init(config(dir)).expect("could not init shelf");
    shelf
        .scoped(|scope| {
            let db = shelf.open_write(scope)?;
            for i in 0..100 {
                db.set(format!("key{}", i), format!("value{}", i))?;
            }
            Ok(())
        })
        .expect("could not seed store");
    shelf
}

fn read_cycle(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let shelf = seeded_shelf(&dir);
    let mut rng = SmallRng::seed_from_u64(7);

    c.bench_function("flock read open/get/close", |b| {
        b.iter(|| {
            let key = format!("key{}", rng.gen_range(0..100));
            shelf
                .scoped(|scope| shelf.open_read(scope)?.get(&key))
                .unwrap()
        })
    });
}

fn write_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("write incr");

    group.bench_function("flock", |b| {
        let dir = TempDir::new().unwrap();
        let shelf = Shelf::init(config(&dir)).unwrap();
        b.iter(|| incr(&shelf))
    });

    group.bench_function("local", |b| {
        let dir = TempDir::new().unwrap();
        let shelf = Shelf::with_parts(config(&dir), FileBackend, LocalLock::new("bench")).unwrap();
        b.iter(|| incr(&shelf))
    });

    group.finish();
}

fn fresh_store(c: &mut Criterion) {
    c.bench_function("init fresh store", |b| {
        b.iter_batched(
            || TempDir::new().unwrap(),
            |dir| Shelf::init(config(&dir)).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

fn incr<L: shelf::NamedLock>(shelf: &Shelf<FileBackend, L>) {
    shelf
        .scoped(|scope| {
            let db = shelf.open_write(scope)?;
            let current: u64 = db
                .get("counter")?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            db.set("counter".to_owned(), (current + 1).to_string())
        })
        .unwrap()
}

criterion_group!(benches, read_cycle, write_cycle, fresh_store);
criterion_main!(benches);

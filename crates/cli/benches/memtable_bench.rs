use criterion::{criterion_group, criterion_main, Criterion};
use memtable::MemTable;

const N: u64 = 10_000;
const VAL_SIZE: usize = 100;

fn memtable_put_sequential(c: &mut Criterion) {
    c.bench_function("memtable_put_10k_sequential", |b| {
        b.iter(|| {
            let mut m = MemTable::new();
            for i in 0..N {
                m.put(format!("k{:06}", i).into_bytes(), vec![b'x'; VAL_SIZE]);
            }
        });
    });
}

fn memtable_get_hit(c: &mut Criterion) {
    let mut m = MemTable::new();
    for i in 0..N {
        m.put(format!("k{:06}", i).into_bytes(), vec![b'x'; VAL_SIZE]);
    }

    c.bench_function("memtable_get_hit_10k", |b| {
        b.iter(|| {
            for i in 0..N {
                let key = format!("k{:06}", i).into_bytes();
                criterion::black_box(m.get(&key));
            }
        });
    });
}

fn memtable_get_miss(c: &mut Criterion) {
    let mut m = MemTable::new();
    for i in 0..N {
        m.put(format!("k{:06}", i).into_bytes(), vec![b'x'; VAL_SIZE]);
    }

    c.bench_function("memtable_get_miss_10k", |b| {
        b.iter(|| {
            for i in 0..N {
                let key = format!("miss{:06}", i).into_bytes();
                criterion::black_box(m.get(&key));
            }
        });
    });
}

fn memtable_overwrite_same_key(c: &mut Criterion) {
    c.bench_function("memtable_overwrite_same_key_10k", |b| {
        b.iter(|| {
            let mut m = MemTable::new();
            for _ in 0..N {
                m.put(b"k".to_vec(), vec![b'x'; VAL_SIZE]);
            }
        });
    });
}

fn memtable_delete(c: &mut Criterion) {
    c.bench_function("memtable_delete_10k", |b| {
        b.iter(|| {
            let mut m = MemTable::new();

            for i in 0..N {
                m.put(format!("k{:06}", i).into_bytes(), vec![b'x'; VAL_SIZE]);
            }

            for i in 0..N {
                m.del(format!("k{:06}", i).into_bytes());
            }
        });
    });
}

fn memtable_snapshot(c: &mut Criterion) {
    let mut m = MemTable::new();
    for i in 0..N {
        m.put(format!("k{:06}", i).into_bytes(), vec![b'x'; VAL_SIZE]);
    }

    c.bench_function("memtable_snapshot_10k", |b| {
        b.iter(|| {
            let mut out = Vec::new();
            m.snapshot(&mut out);
            criterion::black_box(out.len());
        });
    });
}

criterion_group!(
    benches,
    memtable_put_sequential,
    memtable_get_hit,
    memtable_get_miss,
    memtable_overwrite_same_key,
    memtable_delete,
    memtable_snapshot,
);

criterion_main!(benches);

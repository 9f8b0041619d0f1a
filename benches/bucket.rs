use criterion::{criterion_group, criterion_main, Criterion};
use half_disk_hashmap::{Bucket, INVALID_VALUE};

fn filled_bucket(entry_count: u64) -> Bucket {
    let mut bucket = Bucket::new();
    bucket.set_bucket_index(0);

    for i in 0..entry_count {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        bucket.put_value(&i.to_le_bytes(), i as i32, i as i64);
    }

    bucket
}

fn bucket_find_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("Bucket::find_value");

    for entry_count in [8, 32, 128] {
        let bucket = filled_bucket(entry_count);
        let last = entry_count - 1;

        group.bench_function(format!("{entry_count} entries, last key"), |b| {
            b.iter(|| {
                #[allow(clippy::cast_possible_truncation)]
                let value = bucket.find_value(last as i32, &last.to_le_bytes(), INVALID_VALUE);
                assert_ne!(INVALID_VALUE, value);
            });
        });

        group.bench_function(format!("{entry_count} entries, missing key"), |b| {
            b.iter(|| {
                let value = bucket.find_value(-1, &u64::MAX.to_le_bytes(), INVALID_VALUE);
                assert_eq!(INVALID_VALUE, value);
            });
        });
    }
}

fn bucket_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("Bucket::write_to");

    for entry_count in [8, 32, 128] {
        let bucket = filled_bucket(entry_count);

        group.bench_function(format!("{entry_count} entries"), |b| {
            let mut buf = Vec::with_capacity(bucket.size_in_bytes());

            b.iter(|| {
                buf.clear();
                bucket.write_to(&mut buf).unwrap();
            });
        });
    }
}

fn bucket_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("Bucket::read_from");

    for entry_count in [8, 32, 128] {
        let mut bytes = vec![];
        filled_bucket(entry_count).write_to(&mut bytes).unwrap();

        group.bench_function(format!("{entry_count} entries"), |b| {
            let mut bucket = Bucket::new();

            b.iter(|| {
                bucket.read_from(&bytes).unwrap();
            });
        });
    }
}

criterion_group!(benches, bucket_find_value, bucket_encode, bucket_decode);
criterion_main!(benches);

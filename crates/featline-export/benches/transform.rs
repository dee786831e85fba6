use featline_core::{Record, Value, record};
use featline_export::{CompatTransform, ExportFormat, TransformConfig, writer::ChunkWriter};

fn synthetic_rows(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            record! {
                "customer_id" => format!("c{i}"),
                "age" => (i % 90) as i64,
                "score" => i as f64 / 7.0,
                "vip" => i % 3 == 0,
                "created_at" => if i % 2 == 0 { Value::Null } else { Value::from("2024-05-01") },
            }
        })
        .collect()
}

#[divan::bench(args = [1_000, 10_000])]
fn compat_transform(bencher: divan::Bencher, n: usize) {
    let rows = synthetic_rows(n);
    let config = TransformConfig::new("customer_id");
    let transform = CompatTransform::with_timestamp(&config, 1_700_000_000);
    bencher.bench(|| {
        rows.iter()
            .cloned()
            .filter_map(|r| transform.apply(r).ok())
            .count()
    });
}

#[divan::bench(args = [false, true])]
fn csv_chunk_write(bencher: divan::Bencher, compress: bool) {
    let rows = synthetic_rows(10_000);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.csv");
    bencher.bench(|| {
        let mut writer = ChunkWriter::create(&path, ExportFormat::Csv, compress).unwrap();
        writer.write_chunk(&rows).unwrap();
        writer.finish(&[]).unwrap()
    });
}

fn main() {
    divan::main();
}

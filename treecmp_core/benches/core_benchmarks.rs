use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fs;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use treecmp_common::{ContentDigest, FileRecord};
use treecmp_core::{ComparisonEngine, DiffClassifier, PathWalker};

// Helper to create test directory structure
fn create_test_tree(root: &Path, depth: usize, files_per_dir: usize, file_size: usize) {
    if depth == 0 {
        return;
    }

    for i in 0..files_per_dir {
        let file_path = root.join(format!("file_{}.txt", i));
        let mut file = fs::File::create(&file_path).unwrap();
        let content = vec![b'x'; file_size];
        file.write_all(&content).unwrap();
    }

    if depth > 1 {
        for i in 0..3 {
            let dir_path = root.join(format!("subdir_{}", i));
            fs::create_dir(&dir_path).unwrap();
            create_test_tree(&dir_path, depth - 1, files_per_dir, file_size);
        }
    }
}

fn create_records(prefix: &str, count: usize, seed: u8) -> Vec<FileRecord> {
    (0..count)
        .map(|i| FileRecord {
            relative_path: format!("{}_{}.txt", prefix, i),
            absolute_path: PathBuf::from(format!("/bench/{}_{}.txt", prefix, i)),
            size_bytes: 1024,
            last_modified: Utc::now(),
            digest: ContentDigest([seed; 32]),
        })
        .collect()
}

fn bench_walker(c: &mut Criterion) {
    let mut group = c.benchmark_group("walker");

    for (depth, files) in [(1, 10), (2, 10), (3, 10)] {
        let temp = TempDir::new().unwrap();
        create_test_tree(temp.path(), depth, files, 4096);
        let walker = PathWalker::new(0).unwrap();

        group.bench_with_input(BenchmarkId::new("walk_and_hash", depth), &depth, |b, _| {
            b.iter(|| {
                let records = walker.walk(black_box(temp.path())).unwrap();
                black_box(records);
            });
        });
    }

    group.finish();
}

fn bench_classifier(c: &mut Criterion) {
    let classifier = DiffClassifier::new();
    let mut group = c.benchmark_group("classifier");

    for size in [100, 1_000, 10_000] {
        let left = create_records("file", size, 1);
        let identical = left.clone();
        let changed = create_records("file", size, 2);
        let disjoint = create_records("other", size, 1);

        group.bench_with_input(BenchmarkId::new("identical", size), &size, |b, _| {
            b.iter(|| black_box(classifier.classify(black_box(&left), black_box(&identical))));
        });
        group.bench_with_input(BenchmarkId::new("all_changed", size), &size, |b, _| {
            b.iter(|| black_box(classifier.classify(black_box(&left), black_box(&changed))));
        });
        group.bench_with_input(BenchmarkId::new("disjoint", size), &size, |b, _| {
            b.iter(|| black_box(classifier.classify(black_box(&left), black_box(&disjoint))));
        });
    }

    group.finish();
}

fn bench_full_compare(c: &mut Criterion) {
    c.bench_function("full_workflow_compare_folders", |b| {
        let temp_root = TempDir::new().unwrap();
        let left = temp_root.path().join("left");
        let right = temp_root.path().join("right");
        fs::create_dir(&left).unwrap();
        fs::create_dir(&right).unwrap();

        create_test_tree(&left, 2, 5, 1024);
        create_test_tree(&right, 2, 5, 1024);

        let engine = ComparisonEngine::new(temp_root.path().join("staging"), 0).unwrap();

        b.iter(|| {
            let result = engine
                .compare_folders(black_box(&left), black_box(&right))
                .unwrap();
            black_box(result);
        });
    });
}

criterion_group!(walker_benches, bench_walker);
criterion_group!(classifier_benches, bench_classifier);
criterion_group!(workflow_benches, bench_full_compare);

criterion_main!(walker_benches, classifier_benches, workflow_benches);

//! Criterion benchmarks for history cache core operations.
//!
//! Run with: `cargo bench`
//!
//! These benchmarks measure the core operations in isolation,
//! using synthetic data to ensure reproducibility across machines.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use repohist::cache::history::merge_entries;
use repohist::cache::tandem_name;
use repohist::history::tags::{assign_tags, TagList};
use repohist::registry::RepositoryMap;
use repohist::repository::RepositoryBase;
use repohist::{Annotation, Configuration, History, HistoryEntry, PathLookupCache, Repository, Result, TagEntry};

// ─── Helpers ─────────────────────────────────────────────────────────

/// Newest-first synthetic history of `n` changesets, each touching a few of `files` paths.
fn synthetic_history(n: usize, files: usize) -> Vec<HistoryEntry> {
    (0..n)
        .rev()
        .map(|i| {
            let touched = (0..3).map(|k| format!("src/dir_{}/file_{}.c", (i + k) % 20, (i * 7 + k) % files));
            HistoryEntry::new(&format!("rev{:08}", i), "bench", i as i64 * 60, "change").with_files(touched)
        })
        .collect()
}

/// Repository that answers nothing; only its root matters for lookups.
struct StaticRepository {
    base: RepositoryBase,
}

impl Repository for StaticRepository {
    fn base(&self) -> &RepositoryBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RepositoryBase {
        &mut self.base
    }

    fn check_working(&self) -> bool {
        true
    }

    fn history(&self, _file: &Path, _since: Option<&str>, _till: Option<&str>) -> Result<History> {
        Ok(History::default())
    }

    fn annotate(&self, _file: &Path, _revision: Option<&str>) -> Result<Option<Annotation>> {
        Ok(None)
    }

    fn history_get(&self, _sink: &mut dyn Write, _parent: &Path, _basename: &str, _revision: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Source tree with `repos` repository roots, each holding a few nested directories.
fn synthetic_tree(repos: usize) -> (tempfile::TempDir, RepositoryMap, Vec<PathBuf>) {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let config = Configuration {
        source_root: src.clone(),
        data_root: tmp.path().join("data"),
        ..Default::default()
    };
    let mut map = RepositoryMap::default();
    let mut files = Vec::new();
    for r in 0..repos {
        let root = src.join(format!("repo_{}", r));
        for d in 0..4 {
            let dir = root.join(format!("a_{}/b_{}/c_{}", d, d, d));
            std::fs::create_dir_all(&dir).unwrap();
            files.push(dir.join("main.c"));
        }
        let repo: Arc<dyn Repository> = Arc::new(StaticRepository {
            base: RepositoryBase::new("static", &root, "true".to_string(), &config),
        });
        map.insert(repo);
    }
    (tmp, map, files)
}

// ─── Benchmarks ──────────────────────────────────────────────────────

fn bench_merge_entries(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_entries");
    for &cached_len in &[100usize, 10_000] {
        let all = synthetic_history(cached_len + 50, 100);
        let newer: Vec<HistoryEntry> = all[..50].to_vec();
        let cached: Vec<HistoryEntry> = all[50..].to_vec();
        group.bench_with_input(BenchmarkId::from_parameter(cached_len), &cached_len, |b, _| {
            b.iter(|| merge_entries(black_box(newer.clone()), black_box(cached.clone())).unwrap())
        });
    }
    group.finish();
}

fn bench_by_file(c: &mut Criterion) {
    let history = History::new(synthetic_history(5_000, 2_000));
    c.bench_function("by_file_5000_changesets", |b| {
        b.iter(|| black_box(&history).by_file(|_| true).len())
    });
}

fn bench_assign_tags(c: &mut Criterion) {
    let entries = synthetic_history(5_000, 500);
    let tags: TagList = (0..200)
        .map(|i| TagEntry::by_date(&format!("rev{:08}", i * 25), i as i64 * 25 * 60, vec![format!("v{}", i)]))
        .collect();
    c.bench_function("assign_tags_200_tags", |b| {
        b.iter(|| {
            let mut history = History::new(entries.clone());
            assign_tags(Some(black_box(&tags)), &mut history).unwrap();
            history
        })
    });
}

fn bench_tandem_name(c: &mut Criterion) {
    let long = format!("{}.c", "x".repeat(300));
    c.bench_function("tandem_name_long", |b| b.iter(|| tandem_name(black_box(&long), ".hist")));
}

fn bench_lookup(c: &mut Criterion) {
    let (_tmp, map, files) = synthetic_tree(50);
    c.bench_function("lookup_cold", |b| {
        b.iter(|| {
            let cache = PathLookupCache::new();
            for f in &files {
                black_box(cache.resolve(f, &map));
            }
        })
    });
    let warm = PathLookupCache::new();
    for f in &files {
        warm.resolve(f, &map);
    }
    c.bench_function("lookup_warm", |b| {
        b.iter(|| {
            for f in &files {
                black_box(warm.resolve(f, &map));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_merge_entries,
    bench_by_file,
    bench_assign_tags,
    bench_tandem_name,
    bench_lookup
);
criterion_main!(benches);

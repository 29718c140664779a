use bundler::codec::{self, Builtin, CodecBackend, CodecId, Measurement};
use bundler::orchestrator::{Mode, Orchestrator, RunOptions};
use bundler::report::{Echo, StatusLine};
use bundler::scheduler::WorkerOptions;
use bundler::Archive;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn write_inputs(dir: &Path, files: &[(&str, Vec<u8>)]) -> Vec<String> {
    files
        .iter()
        .map(|(name, data)| {
            let p = dir.join(name);
            fs::write(&p, data).unwrap();
            p.to_string_lossy().into_owned()
        })
        .collect()
}

fn pack_opts(archive: PathBuf, inputs: Vec<String>, codecs: &[CodecId]) -> RunOptions {
    RunOptions {
        mode: Mode::Pack,
        archive: Some(archive),
        inputs,
        worker: WorkerOptions { codecs: codecs.to_vec(), flat: true, ..WorkerOptions::default() },
        ..RunOptions::default()
    }
}

fn run(opts: RunOptions) -> bundler::RunReport {
    Orchestrator::new(opts).with_echo(Echo::Silent).run().unwrap()
}

fn done_labels(lines: &[StatusLine]) -> Vec<(String, String)> {
    lines
        .iter()
        .filter_map(|l| match l {
            StatusLine::Done { path, label, .. } => Some((path.clone(), label.clone())),
            _ => None,
        })
        .collect()
}

#[test]
fn identity_codec_stores_everything_raw() {
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(
        dir.path(),
        &[("a.bin", vec![7u8; 10]), ("b.bin", vec![b'q'; 10_000]), ("c.bin", Vec::new())],
    );
    let archive = dir.path().join("out.bnd");
    let report = run(pack_opts(archive.clone(), inputs, &[CodecId::None]));

    assert_eq!(report.totals.errors, 0);
    assert_eq!(report.totals.processed, 3);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.totals.total_in, report.totals.total_out);
    for line in &report.lines {
        if let StatusLine::Done { ratio, label, .. } = line {
            assert_eq!(*ratio, 0.0);
            assert_eq!(label, "skipped");
        }
    }

    let packed = Archive::read_file(&archive).unwrap();
    let sizes: Vec<_> = packed.entries().iter().map(|e| e.content.len()).collect();
    assert_eq!(sizes, vec![10, 10_000, 0]);
    assert!(packed.entries().iter().all(|e| !codec::is_packed(&e.content)));
}

#[test]
fn repetitive_content_is_compressed() {
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(dir.path(), &[("same.txt", vec![b'x'; 10_000])]);
    let report = run(pack_opts(dir.path().join("out.bnd"), inputs, &[CodecId::Zstd]));

    assert_eq!(report.totals.errors, 0);
    assert!(report.totals.ratio() >= 95.0, "ratio {}", report.totals.ratio());
    assert_eq!(done_labels(&report.lines), vec![("same.txt".to_owned(), "zstd".to_owned())]);
    match &report.lines[0] {
        StatusLine::Done { ratio, .. } => assert!(*ratio >= 95.0),
        other => panic!("unexpected line {other:?}"),
    }
}

#[test]
fn extract_restores_raw_and_compressed_entries() {
    let dir = TempDir::new().unwrap();
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let random: Vec<u8> = (0..4096)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 32) as u8
        })
        .collect();
    let text = b"the quick brown fox ".repeat(500);
    let inputs = write_inputs(dir.path(), &[("noise.bin", random.clone()), ("text.txt", text.clone())]);
    let archive = dir.path().join("out.bnd");
    run(pack_opts(archive.clone(), inputs, &[CodecId::Zstd, CodecId::Lz4]));

    let stored = Archive::read_file(&archive).unwrap();
    assert!(!codec::is_packed(&stored.entries()[0].content));
    assert!(codec::is_packed(&stored.entries()[1].content));

    let out = dir.path().join("restored");
    let report = run(RunOptions {
        mode: Mode::Extract,
        archive: Some(archive.clone()),
        output_dir: out.clone(),
        ..RunOptions::default()
    });
    assert_eq!(report.totals.errors, 0);
    assert_eq!(report.totals.processed, 2);
    assert_eq!(fs::read(out.join("noise.bin")).unwrap(), random);
    assert_eq!(fs::read(out.join("text.txt")).unwrap(), text);

    let test = run(RunOptions { mode: Mode::Test, archive: Some(archive), ..RunOptions::default() });
    assert_eq!(test.totals.errors, 0);
    assert_eq!(test.totals.processed, 2);
}

#[test]
fn move_keeps_sources_when_anything_failed() {
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(dir.path(), &[("keep.txt", b"keep me ".repeat(100))]);
    let archive = dir.path().join("no-such-dir").join("out.bnd");
    let report = run(RunOptions { mode: Mode::Move, ..pack_opts(archive.clone(), inputs, &[]) });

    assert_eq!(report.totals.errors, 1);
    assert_eq!(report.exit_code(), 1);
    assert!(!archive.exists());
    assert!(dir.path().join("keep.txt").exists());
}

#[test]
fn move_deletes_sources_after_a_clean_run() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    fs::create_dir(&src).unwrap();
    write_inputs(&src, &[("one.txt", b"one ".repeat(50)), ("two.txt", b"two ".repeat(50))]);
    let archive = dir.path().join("out.bnd");
    let report = run(RunOptions {
        mode: Mode::Move,
        ..pack_opts(archive.clone(), vec![src.to_string_lossy().into_owned()], &[])
    });

    assert_eq!(report.totals.errors, 0);
    assert!(!src.join("one.txt").exists());
    assert!(!src.join("two.txt").exists());
    assert!(src.exists(), "directories are left alone");
    assert_eq!(Archive::read_file(&archive).unwrap().len(), 2);
}

#[test]
fn dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(dir.path(), &[("a.txt", b"aaaa".repeat(100))]);
    let archive = dir.path().join("out.bnd");
    let report = run(RunOptions { mode: Mode::Move, dry_run: true, ..pack_opts(archive.clone(), inputs, &[]) });

    assert_eq!(report.totals.errors, 0);
    assert_eq!(report.toc.len(), 1);
    assert!(!archive.exists());
    assert!(dir.path().join("a.txt").exists());
}

#[test]
fn already_wrapped_files_extract_byte_for_byte() {
    let dir = TempDir::new().unwrap();
    let wrapped = codec::pack(CodecId::Zstd, &b"hello world ".repeat(500), 3).unwrap();
    let inputs = write_inputs(dir.path(), &[("a.bin", wrapped.clone()), ("plain.txt", b"plain".to_vec())]);
    let archive = dir.path().join("out.bnd");
    let report = run(pack_opts(archive.clone(), inputs, &[CodecId::Zstd]));
    assert_eq!(report.totals.errors, 0);

    let stored = Archive::read_file(&archive).unwrap();
    assert_eq!(codec::packed_codec(&stored.entries()[0].content), Some(CodecId::None));
    assert_eq!(stored.entries()[1].content, b"plain");

    let out = dir.path().join("restored");
    let report = run(RunOptions {
        mode: Mode::Extract,
        archive: Some(archive),
        output_dir: out.clone(),
        ..RunOptions::default()
    });
    assert_eq!(report.totals.errors, 0);
    assert_eq!(fs::read(out.join("a.bin")).unwrap(), wrapped);
    assert_eq!(fs::read(out.join("plain.txt")).unwrap(), b"plain");
}

#[test]
fn destination_archive_is_never_an_input() {
    let dir = TempDir::new().unwrap();
    write_inputs(dir.path(), &[("a.txt", b"first ".repeat(100))]);
    let archive = dir.path().join("out.bnd");
    let everything = vec![dir.path().join("*").to_string_lossy().into_owned()];

    let first = run(pack_opts(archive.clone(), everything.clone(), &[]));
    assert_eq!(first.toc.len(), 1);

    // Packing again must not nest the old archive inside the new one.
    let again = run(pack_opts(archive.clone(), everything.clone(), &[]));
    let names: Vec<_> = again.toc.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt"]);

    let moved = run(RunOptions { mode: Mode::Move, ..pack_opts(archive.clone(), everything, &[]) });
    assert_eq!(moved.totals.errors, 0);
    assert!(archive.exists());
    assert!(!dir.path().join("a.txt").exists());
    let kept = Archive::read_file(&archive).unwrap();
    assert_eq!(kept.entries().len(), 1);
    assert_eq!(codec::unpack(&kept.entries()[0].content).unwrap(), b"first ".repeat(100));
}

#[test]
fn list_reports_every_entry() {
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(
        dir.path(),
        &[("x.txt", b"xx".repeat(300)), ("y.txt", vec![1, 2, 3]), ("z.txt", Vec::new())],
    );
    let archive = dir.path().join("out.bnd");
    let packed = run(pack_opts(archive.clone(), inputs, &[]));

    let listed = run(RunOptions { mode: Mode::List, archive: Some(archive), ..RunOptions::default() });
    assert_eq!(listed.totals.errors, 0);
    assert_eq!(listed.toc, packed.toc);
    let names: Vec<_> = listed.toc.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["x.txt", "y.txt", "z.txt"]);
    assert_eq!(listed.toc[1].size, 3);
}

#[test]
fn compress_then_decompress_in_place() {
    let dir = TempDir::new().unwrap();
    let body = b"in place round trip ".repeat(300);
    let inputs = write_inputs(dir.path(), &[("doc.txt", body.clone())]);
    let file = dir.path().join("doc.txt");

    let report = run(RunOptions {
        mode: Mode::Compress,
        inputs: inputs.clone(),
        worker: WorkerOptions { codecs: vec![CodecId::Brotli], ..WorkerOptions::default() },
        ..RunOptions::default()
    });
    assert_eq!(report.totals.errors, 0);
    let on_disk = fs::read(&file).unwrap();
    assert_eq!(codec::packed_codec(&on_disk), Some(CodecId::Brotli));

    run(RunOptions { mode: Mode::Decompress, inputs: inputs.clone(), ..RunOptions::default() });
    assert_eq!(fs::read(&file).unwrap(), body);

    run(RunOptions { mode: Mode::Toggle, inputs: inputs.clone(), ..RunOptions::default() });
    assert!(codec::is_packed(&fs::read(&file).unwrap()));
    run(RunOptions { mode: Mode::Toggle, inputs, ..RunOptions::default() });
    assert_eq!(fs::read(&file).unwrap(), body);
}

/// Builtin codecs, slowed down so that earlier files finish last, with a
/// gauge of how many measurements run at once.
struct Instrumented {
    unsafe_codec: Option<CodecId>,
    active:       AtomicUsize,
    peak:         AtomicUsize,
}

impl Instrumented {
    fn new(unsafe_codec: Option<CodecId>) -> Self {
        Self { unsafe_codec, active: AtomicUsize::new(0), peak: AtomicUsize::new(0) }
    }
}

impl CodecBackend for Instrumented {
    fn measure(&self, content: &[u8], codecs: &[CodecId], level: i32) -> Vec<Measurement> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        // Files are 100, 200, ... bytes long; shorter ones sleep longer.
        let delay = 10 * (12 - (content.len() / 100).min(11)) as u64;
        thread::sleep(Duration::from_millis(delay));
        let out = Builtin.measure(content, codecs, level);
        self.active.fetch_sub(1, Ordering::SeqCst);
        out
    }

    fn parallel_safe(&self, codec: CodecId) -> bool {
        Some(codec) != self.unsafe_codec
    }
}

fn staggered_inputs(dir: &Path, count: usize) -> Vec<String> {
    let files: Vec<(String, Vec<u8>)> = (0..count)
        .map(|i| (format!("f{i:02}.txt"), vec![b'a' + i as u8; (i + 1) * 100]))
        .collect();
    let borrowed: Vec<(&str, Vec<u8>)> = files.iter().map(|(n, d)| (n.as_str(), d.clone())).collect();
    write_inputs(dir, &borrowed)
}

#[test]
fn archive_order_follows_discovery_not_completion() {
    let dir = TempDir::new().unwrap();
    let inputs = staggered_inputs(dir.path(), 10);
    let archive = dir.path().join("out.bnd");
    let backend = Instrumented::new(None);
    let mut opts = pack_opts(archive.clone(), inputs, &[CodecId::Zstd]);
    opts.worker.threads = 4;

    let report = Orchestrator::new(opts).with_backend(&backend).with_echo(Echo::Silent).run().unwrap();
    assert_eq!(report.totals.errors, 0);

    let names: Vec<_> = Archive::read_file(&archive)
        .unwrap()
        .into_entries()
        .into_iter()
        .map(|e| e.name)
        .collect();
    let expected: Vec<_> = (0..10).map(|i| format!("f{i:02}.txt")).collect();
    assert_eq!(names, expected);

    let peak = backend.peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak concurrency {peak}");
    assert!(peak > 1, "batches ran one worker at a time");
}

#[test]
fn codec_that_is_not_parallel_safe_serializes_the_run() {
    let dir = TempDir::new().unwrap();
    let inputs = staggered_inputs(dir.path(), 6);
    let backend = Instrumented::new(Some(CodecId::Lz4));
    let mut opts = pack_opts(dir.path().join("out.bnd"), inputs, &[CodecId::Zstd, CodecId::Lz4]);
    opts.worker.threads = 6;

    let report = Orchestrator::new(opts).with_backend(&backend).with_echo(Echo::Silent).run().unwrap();
    assert_eq!(report.totals.processed, 6);
    assert_eq!(backend.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn progress_reaches_every_record() {
    let dir = TempDir::new().unwrap();
    let inputs = staggered_inputs(dir.path(), 5);
    let calls = AtomicUsize::new(0);
    let cb = |p: &bundler::scheduler::Progress| {
        assert!(p.done <= p.total);
        calls.fetch_add(1, Ordering::SeqCst);
    };
    let report = Orchestrator::new(pack_opts(dir.path().join("out.bnd"), inputs, &[]))
        .with_echo(Echo::Silent)
        .with_progress(&cb)
        .run()
        .unwrap();
    assert_eq!(report.totals.processed, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

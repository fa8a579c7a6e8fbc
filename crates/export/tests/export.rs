use futures::StreamExt;
use newmonkey_compress::Compression;
use newmonkey_diskcache::blockfile::{CHILD_SIZE, EntryState};
use newmonkey_diskcache::fixture::{BlockfileBuilder, FixtureEntry, SimpleCacheBuilder};
use newmonkey_export::error::ErrorKind;
use newmonkey_export::{
    ContentTypeFilter, EntryReport, ExportEvent, Exporter, Layout, Options, Outcome, SkipReason, Summary,
};
use rstest::rstest;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";
const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00";
const JPEG: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00";

struct Run {
    reports: Vec<EntryReport>,
    summary: Summary,
}

impl Run {
    fn extracted(&self) -> usize {
        self.reports.iter().filter(|r| r.is_extracted()).count()
    }

    fn report(&self, url: &str) -> &EntryReport {
        self.reports.iter().find(|r| r.url.as_deref() == Some(url)).unwrap()
    }
}

async fn export_with(cache: &Path, out: &Path, options: Options, cancel: CancellationToken) -> Run {
    let exporter = Exporter::open(cache, out, options).unwrap();
    let events: Vec<ExportEvent> = exporter.run(cancel).collect().await;

    assert!(matches!(events.first(), Some(ExportEvent::Started { .. })));
    let Some(ExportEvent::Complete(summary)) = events.last().cloned() else {
        panic!("stream must end with a summary");
    };
    let reports: Vec<_> = events[1..events.len() - 1]
        .iter()
        .map(|event| match event {
            ExportEvent::Entry(report) => report.clone(),
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(summary.total(), reports.len() as u64);
    Run { reports, summary }
}

async fn export(cache: &Path, out: &Path, options: Options) -> Run {
    export_with(cache, out, options, CancellationToken::new()).await
}

fn blockfile(entries: impl IntoIterator<Item = FixtureEntry>) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    entries.into_iter().fold(BlockfileBuilder::new(), BlockfileBuilder::entry).write(dir.path()).unwrap();
    dir
}

/// Every file under `root`, relative path to contents.
fn files(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, found: &mut BTreeMap<String, Vec<u8>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, found);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                found.insert(relative, std::fs::read(&path).unwrap());
            }
        }
    }
    let mut found = BTreeMap::new();
    walk(root, root, &mut found);
    found
}

fn images() -> Vec<FixtureEntry> {
    vec![
        FixtureEntry::new("https://cdn.discordapp.com/avatars/1/a.png").header("Content-Type", "image/png").body(PNG),
        FixtureEntry::new("https://media.discordapp.net/attachments/2/b.gif?width=64")
            .header("Content-Type", "image/gif")
            .body(GIF),
        // No declared type, no extension: sniffed.
        FixtureEntry::new("https://cdn.discordapp.com/emojis/3").body(JPEG),
    ]
}

#[tokio::test]
async fn test_blockfile_round_trip() {
    let cache = blockfile(images());
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    assert_eq!(run.summary.extracted, 3);
    assert_eq!(run.summary.failed, 0);
    assert!(!run.summary.cancelled);
    assert_eq!(
        files(out.path()),
        BTreeMap::from([
            ("3.jpg".to_string(), JPEG.to_vec()),
            ("a.png".to_string(), PNG.to_vec()),
            ("b.gif".to_string(), GIF.to_vec()),
        ])
    );
    let sniffed = run.report("https://cdn.discordapp.com/emojis/3").extracted().unwrap();
    assert_eq!(sniffed.content_type, "image/jpeg");
    assert_eq!(run.summary.hosts["cdn.discordapp.com"], 2);
    assert_eq!(run.summary.bytes, (PNG.len() + GIF.len() + JPEG.len()) as u64);
}

#[rstest]
#[case::plain(false)]
#[case::key_sha256(true)]
#[tokio::test]
async fn test_simple_cache_round_trip(#[case] key_sha256: bool) {
    let cache = tempfile::tempdir().unwrap();
    images()
        .into_iter()
        .fold(SimpleCacheBuilder::new().key_sha256(key_sha256), SimpleCacheBuilder::entry)
        .write(cache.path())
        .unwrap();
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    assert_eq!(run.summary.extracted, 3);
    assert_eq!(files(out.path()).keys().collect::<Vec<_>>(), vec!["3.jpg", "a.png", "b.gif"]);
}

#[rstest]
#[case::gzip(Compression::Gzip, "gzip")]
#[case::deflate(Compression::Deflate, "deflate")]
#[case::brotli(Compression::Brotli, "br")]
#[case::zstd(Compression::Zstd, "zstd")]
#[tokio::test]
async fn test_content_encoding_decoded(#[case] compression: Compression, #[case] encoding: &str) {
    let body = b"function hello() { return 'cached'; }\n".repeat(100);
    let cache = blockfile([FixtureEntry::new("https://discord.com/assets/app.js")
        .header("Content-Type", "text/javascript")
        .header("Content-Encoding", encoding)
        .body(compression.compress(&body).unwrap())]);
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    let file = run.reports[0].extracted().unwrap();
    assert_eq!(file.warning, None);
    assert_eq!(file.byte_size, body.len() as u64);
    assert_eq!(std::fs::read(out.path().join("app.js")).unwrap(), body);
}

#[tokio::test]
async fn test_unsupported_encoding_keeps_raw_bytes() {
    let stored = b"\x00\x01opaque dictionary-compressed bytes".to_vec();
    let cache = blockfile([FixtureEntry::new("https://discord.com/assets/app.js")
        .header("Content-Type", "text/javascript")
        .header("Content-Encoding", "sdch")
        .body(stored.clone())]);
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    let file = run.reports[0].extracted().unwrap();
    assert!(file.warning.as_deref().unwrap().contains("sdch"));
    assert_eq!(run.summary.warnings, 1);
    assert_eq!(std::fs::read(out.path().join("app.js")).unwrap(), stored);
}

#[tokio::test]
async fn test_name_collisions_disambiguated() {
    let cache = blockfile([
        FixtureEntry::new("https://cdn.discordapp.com/x/cat.png?size=16").header("Content-Type", "image/png").body(PNG),
        FixtureEntry::new("https://cdn.discordapp.com/x/cat.png?size=32").header("Content-Type", "image/png").body(PNG),
        FixtureEntry::new("https://cdn.discordapp.com/y/cat.png").header("Content-Type", "image/png").body(PNG),
    ]);
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    assert_eq!(run.summary.extracted, 3);
    assert_eq!(files(out.path()).keys().collect::<Vec<_>>(), vec!["cat-2.png", "cat-3.png", "cat.png"]);
    assert!(run.reports.iter().all(|r| r.extracted().unwrap().suggested_name == "cat.png"));
}

#[tokio::test]
async fn test_one_corrupt_entry_fails_alone() {
    let mut entries = images();
    entries.push(
        FixtureEntry::new("https://cdn.discordapp.com/broken.png")
            .header("Content-Type", "image/png")
            .body(PNG)
            .corrupt_checksum(),
    );
    let cache = blockfile(entries);
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    assert_eq!((run.summary.extracted, run.summary.failed), (3, 1));
    let failure = &run.summary.failures[0];
    assert!(failure.hash.is_some());
    assert!(failure.reason.starts_with("corrupted cache data"), "{}", failure.reason);
    assert_eq!(files(out.path()).len(), 3);
}

#[tokio::test]
async fn test_path_traversal_contained() {
    let cache = blockfile([
        FixtureEntry::new("https://evil.test/x/..%2F..%2Fetc%2Fpasswd").body(b"root:x:0:0".to_vec()),
        FixtureEntry::new("https://evil.test/..%5C..%5Cboot.ini").body(b"[boot loader]".to_vec()),
    ]);
    let scratch = tempfile::tempdir().unwrap();
    let out = scratch.path().join("out");
    let run = export(cache.path(), &out, Options { layout: Layout::Grouped, ..Options::default() }).await;

    assert_eq!(run.summary.extracted, 2);
    let root = std::fs::canonicalize(&out).unwrap();
    for report in &run.reports {
        let file = report.extracted().unwrap();
        assert!(file.final_path.starts_with(&root), "{}", file.final_path.display());
        assert!(!file.suggested_name.contains(['/', '\\']));
    }
    // Nothing escaped next to the output root.
    let siblings: Vec<_> = std::fs::read_dir(scratch.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(siblings, vec!["out"]);
}

#[tokio::test]
async fn test_rerun_never_overwrites() {
    let cache = blockfile(images());
    let out = tempfile::tempdir().unwrap();
    export(cache.path(), out.path(), Options::default()).await;
    let first = files(out.path());

    let second = export(cache.path(), out.path(), Options::default()).await;
    assert_eq!(second.summary.extracted, 3);
    let after = files(out.path());
    assert_eq!(after.len(), 6);
    for (name, contents) in &first {
        assert_eq!(&after[name], contents);
    }
    assert_eq!(after["a-2.png"], PNG);
    assert_eq!(after["b-2.gif"], GIF);
    assert_eq!(after["3-2.jpg"], JPEG);
}

#[tokio::test]
async fn test_overwrite_replaces() {
    let cache = blockfile(images());
    let out = tempfile::tempdir().unwrap();
    std::fs::write(out.path().join("a.png"), b"stale").unwrap();
    let options = Options { overwrite: true, ..Options::default() };
    export(cache.path(), out.path(), options.clone()).await;
    export(cache.path(), out.path(), options).await;

    let after = files(out.path());
    assert_eq!(after.len(), 3);
    assert_eq!(after["a.png"], PNG);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let cache = blockfile(images());
    let out = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let run = export_with(cache.path(), out.path(), Options::default(), cancel).await;

    assert!(run.summary.cancelled);
    assert_eq!(run.summary.total(), 0);
    assert!(files(out.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_leaves_no_partial_files() {
    let body = |i: usize| -> Vec<u8> { [PNG, &vec![i as u8; 64 * 1024]].concat() };
    let cache = blockfile((0..40).map(|i| {
        FixtureEntry::new(format!("https://cdn.discordapp.com/big/{i}.png"))
            .header("Content-Type", "image/png")
            .body(body(i))
            .external()
    }));
    let out = tempfile::tempdir().unwrap();
    let options = Options { workers: NonZeroUsize::new(1).unwrap(), ..Options::default() };
    let exporter = Exporter::open(cache.path(), out.path(), options).unwrap();
    let cancel = CancellationToken::new();

    let mut events = std::pin::pin!(exporter.run(cancel.clone()));
    let mut summary = None;
    while let Some(event) = events.next().await {
        match event {
            ExportEvent::Entry(_) => cancel.cancel(),
            ExportEvent::Complete(done) => summary = Some(done),
            ExportEvent::Started { .. } => {},
        }
    }
    let summary = summary.unwrap();

    assert!(summary.cancelled);
    assert!(summary.extracted >= 1 && summary.extracted < 40, "{}", summary.extracted);
    let written = files(out.path());
    assert_eq!(written.len() as u64, summary.extracted);
    for (name, contents) in &written {
        assert!(!name.ends_with(".part"), "{name}");
        let i: usize = name.trim_end_matches(".png").parse().unwrap();
        assert_eq!(contents, &body(i));
    }
}

#[tokio::test]
async fn test_content_type_filter() {
    let mut entries = images();
    entries.push(
        FixtureEntry::new("https://discord.com/assets/app.js").header("Content-Type", "text/javascript").body(b"x"),
    );
    entries.push(FixtureEntry::new("https://discord.com/api/me").body(b"{\"id\": 1}".to_vec()));
    let cache = blockfile(entries);
    let out = tempfile::tempdir().unwrap();
    let options = Options { content_types: Some(ContentTypeFilter::images()), ..Options::default() };
    let run = export(cache.path(), out.path(), options).await;

    assert_eq!((run.summary.extracted, run.summary.skipped), (3, 2));
    assert_eq!(
        run.report("https://discord.com/api/me").outcome,
        Outcome::Skipped(SkipReason::ContentType("application/json".into()))
    );
    assert_eq!(run.summary.skip_reasons["content type"], 2);

    let only_js = ContentTypeFilter::new(["text/javascript"]).unwrap();
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options { content_types: Some(only_js), ..Options::default() }).await;
    assert_eq!(run.extracted(), 1);
    assert_eq!(files(out.path()).keys().collect::<Vec<_>>(), vec!["app.js"]);
}

#[tokio::test]
async fn test_non_success_status_skipped() {
    let cache = blockfile([
        FixtureEntry::new("https://cdn.discordapp.com/gone.png").status(404).body(b"not found".to_vec()),
        FixtureEntry::new("https://cdn.discordapp.com/moved.png").status(301),
        FixtureEntry::new("https://cdn.discordapp.com/ok.png").header("Content-Type", "image/png").body(PNG),
    ]);
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    assert_eq!(
        run.report("https://cdn.discordapp.com/gone.png").outcome,
        Outcome::Skipped(SkipReason::HttpStatus(404))
    );
    assert_eq!(run.summary.skip_reasons["HTTP status"], 2);
    assert_eq!(files(out.path()).keys().collect::<Vec<_>>(), vec!["ok.png"]);
}

#[tokio::test]
async fn test_inactive_entries_never_exported() {
    let cache = blockfile([
        FixtureEntry::new("https://a.test/live.png").header("Content-Type", "image/png").body(PNG),
        FixtureEntry::new("https://a.test/evicted.png").body(PNG).state(EntryState::Evicted),
        FixtureEntry::new("https://a.test/doomed.png").body(PNG).state(EntryState::Doomed),
    ]);
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    assert_eq!(run.reports.len(), 1);
    assert_eq!(run.reports[0].url.as_deref(), Some("https://a.test/live.png"));
    assert_eq!(files(out.path()).keys().collect::<Vec<_>>(), vec!["live.png"]);
}

#[tokio::test]
async fn test_truncated_bucket_table_tolerated() {
    let cache = tempfile::tempdir().unwrap();
    (0..32)
        .map(|i| FixtureEntry::new(format!("https://a.test/{i}.png")).header("Content-Type", "image/png").body(PNG))
        .fold(BlockfileBuilder::new().table_len(64).truncate_table(32), BlockfileBuilder::entry)
        .write(cache.path())
        .unwrap();
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    assert_eq!(run.summary.failed, 0);
    assert!(run.summary.extracted <= 32);
    assert_eq!(files(out.path()).len() as u64, run.summary.extracted);
}

#[tokio::test]
async fn test_sparse_payload_stitched() {
    let first = [b"\x00\x00\x00\x18ftypmp42".as_slice(), &vec![7u8; CHILD_SIZE as usize - 12]].concat();
    let third = b"trailing bytes".to_vec();
    let cache = blockfile([FixtureEntry::new("https://cdn.discordapp.com/attachments/v.mp4")
        .header("Content-Type", "video/mp4")
        .sparse(vec![(0, first.clone()), (2, third.clone())])]);
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    assert_eq!(run.summary.extracted, 1);
    assert_eq!(run.summary.skip_reasons["sparse child"], 2);
    let stitched = std::fs::read(out.path().join("v.mp4")).unwrap();
    assert_eq!(stitched.len(), 2 * CHILD_SIZE as usize + third.len());
    assert_eq!(&stitched[..first.len()], &first[..]);
    assert!(stitched[first.len()..2 * CHILD_SIZE as usize].iter().all(|b| *b == 0));
    assert_eq!(&stitched[2 * CHILD_SIZE as usize..], &third[..]);
}

#[tokio::test]
async fn test_simple_cache_sparse_payload() {
    let head = b"\x00\x00\x00\x18ftypmp42 first range".to_vec();
    let cache = tempfile::tempdir().unwrap();
    SimpleCacheBuilder::new()
        .entry(
            FixtureEntry::new("https://media.discordapp.net/attachments/1/2/clip.mp4")
                .header("Content-Type", "video/mp4")
                .sparse(vec![(0, head.clone()), (1, b"second range".to_vec())]),
        )
        .write(cache.path())
        .unwrap();
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    assert_eq!(run.summary.extracted, 1);
    let body = std::fs::read(out.path().join("clip.mp4")).unwrap();
    assert_eq!(body.len(), CHILD_SIZE as usize + 12);
    assert_eq!(&body[..head.len()], &head[..]);
    assert_eq!(&body[CHILD_SIZE as usize..], b"second range");
}

#[tokio::test]
async fn test_external_payload() {
    let body = [PNG, &(0..100_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>()].concat();
    let cache = blockfile([FixtureEntry::new("https://cdn.discordapp.com/banners/big.png")
        .header("Content-Type", "image/png")
        .body(body.clone())
        .external()]);
    let out = tempfile::tempdir().unwrap();
    export(cache.path(), out.path(), Options::default()).await;

    assert_eq!(std::fs::read(out.path().join("big.png")).unwrap(), body);
}

#[tokio::test]
async fn test_simple_cache_crc_mismatch() {
    let cache = tempfile::tempdir().unwrap();
    SimpleCacheBuilder::new()
        .entry(FixtureEntry::new("https://a.test/good.png").header("Content-Type", "image/png").body(PNG))
        .entry(
            FixtureEntry::new("https://a.test/bad.png")
                .header("Content-Type", "image/png")
                .body(PNG)
                .corrupt_checksum(),
        )
        .write(cache.path())
        .unwrap();
    let out = tempfile::tempdir().unwrap();
    let run = export(cache.path(), out.path(), Options::default()).await;

    assert_eq!((run.summary.extracted, run.summary.failed), (1, 1));
    assert!(run.report("https://a.test/bad.png").is_failed());
    assert_eq!(files(out.path()).keys().collect::<Vec<_>>(), vec!["good.png"]);
}

#[tokio::test]
async fn test_grouped_layout() {
    let mut entries = images();
    entries.push(FixtureEntry::new("https://example.com/y.png").header("Content-Type", "image/png").body(PNG));
    entries.push(
        FixtureEntry::new("https://discord.com/api/v9/badge.png").header("Content-Type", "image/png").body(PNG),
    );
    let cache = blockfile(entries);
    let out = tempfile::tempdir().unwrap();
    let options = Options { layout: Layout::Grouped, ..Options::default() };
    export(cache.path(), out.path(), options).await;

    assert_eq!(
        files(out.path()).keys().collect::<Vec<_>>(),
        vec![
            "image/attachments/b.gif",
            "image/avatars/a.png",
            "image/emojis/3.jpg",
            "image/other/discord.com/badge.png",
            "image/other/example.com/y.png",
        ]
    );
}

#[test]
fn test_missing_cache_is_fatal() {
    let empty = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let err = Exporter::open(empty.path(), out.path(), Options::default()).err().unwrap();
    assert!(matches!(&*err, ErrorKind::CacheRoot(_)));
}

#[test]
fn test_unusable_output_is_fatal() {
    let cache = blockfile(images());
    let scratch = tempfile::tempdir().unwrap();
    let not_a_dir = scratch.path().join("file");
    std::fs::write(&not_a_dir, b"").unwrap();
    let err = Exporter::open(cache.path(), &not_a_dir, Options::default()).err().unwrap();
    assert!(matches!(&*err, ErrorKind::OutputRoot(_)));
}

mod support;

use shardfs::error::ShardError;
use shardfs::index::MetadataIndex;
use shardfs::protocol::Frame;

use support::{tar_entries, Cluster};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_type_round_trip() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;

    let body = b"int main(void) { return 0; }\n";
    client.upload_bytes("sample.c", "~S1/folder1", body).await.unwrap();

    assert_eq!(client.download("sample.c").await.unwrap(), body);
    assert_eq!(std::fs::read(cluster.root_path().join("folder1/sample.c")).unwrap(), body);
    assert!(cluster.staged_files().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shard_types_round_trip() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;

    client.upload_bytes("report.pdf", "~S2/docs", b"%PDF-1.7 body").await.unwrap();
    client.upload_bytes("notes.txt", "~S3", b"plain text").await.unwrap();
    client.upload_bytes("bundle.zip", "~S4/pack", b"PK\x03\x04").await.unwrap();

    assert_eq!(client.download("report.pdf").await.unwrap(), b"%PDF-1.7 body");
    assert_eq!(client.download("notes.txt").await.unwrap(), b"plain text");
    assert_eq!(client.download("bundle.zip").await.unwrap(), b"PK\x03\x04");

    // Stored on the shards, not the coordinator.
    assert!(cluster.shard_root(".pdf").join("docs/report.pdf").is_file());
    assert!(cluster.shard_root(".txt").join("notes.txt").is_file());
    assert!(cluster.shard_root(".zip").join("pack/bundle.zip").is_file());
    assert!(!cluster.root_path().join("docs/report.pdf").exists());
    assert!(cluster.staged_files().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn uploaded_pdf_is_listed_once() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;
    client.upload_bytes("report.pdf", "~S2/docs", b"%PDF").await.unwrap();

    let listing = client.list("docs").await.unwrap();
    assert!(listing.is_complete());
    assert_eq!(listing.names, vec!["report.pdf".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn folder_listing_spans_all_nodes() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;
    client.upload_bytes("x.c", "~S1/folder1", b"x").await.unwrap();
    client.upload_bytes("y.pdf", "~S2/folder1", b"y").await.unwrap();
    client.upload_bytes("z.txt", "~S3/folder1", b"z").await.unwrap();
    client.upload_bytes("elsewhere.c", "~S1/folder2", b"e").await.unwrap();

    let expected = vec!["x.c".to_string(), "y.pdf".to_string(), "z.txt".to_string()];
    assert_eq!(client.list("folder1").await.unwrap().names, expected);
    // A root token on the prefix is accepted and ignored.
    assert_eq!(client.list("~S1/folder1").await.unwrap().names, expected);
    assert!(client.list("no_such_dir").await.unwrap().names.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_absent_file_is_not_found() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;

    assert!(matches!(client.remove("ghost.c").await, Err(ShardError::NotFound(_))));
    assert!(matches!(client.remove("ghost.pdf").await, Err(ShardError::NotFound(_))));
    assert!(matches!(client.download("ghost.txt").await, Err(ShardError::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_deletes_and_evicts() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;
    client.upload_bytes("x.c", "~S1/folder1", b"x").await.unwrap();
    client.upload_bytes("y.pdf", "~S2/folder1", b"y").await.unwrap();

    assert_eq!(client.remove("x.c").await.unwrap(), "removed");
    assert_eq!(client.remove("y.pdf").await.unwrap(), "removed");
    assert!(!cluster.root_path().join("folder1/x.c").exists());
    assert!(!cluster.shard_root(".pdf").join("folder1/y.pdf").exists());
    assert!(cluster.state.index.get("x.c").is_none());
    assert!(cluster.state.index.get("y.pdf").is_none());
    assert!(matches!(client.download("x.c").await, Err(ShardError::NotFound(_))));
    assert!(matches!(client.remove("x.c").await, Err(ShardError::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reupload_overwrites() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;
    for name in ["a.txt", "a.c"] {
        let dest = if name.ends_with(".c") { "~S1/folder1" } else { "~S3/folder1" };
        client.upload_bytes(name, dest, b"first version, longer").await.unwrap();
        client.upload_bytes(name, dest, b"second").await.unwrap();
        assert_eq!(client.download(name).await.unwrap(), b"second");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn archives_of_unknown_or_excluded_types_are_unsupported() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;

    assert!(matches!(client.archive(".exe").await, Err(ShardError::UnsupportedType(_))));
    match client.archive("zip").await {
        Err(ShardError::UnsupportedType(m)) => assert!(m.contains("not offered")),
        other => panic!("unexpected {:?}", other.map(|b| b.len())),
    }
    // The session is still usable afterwards.
    assert!(client.list(".").await.unwrap().names.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn archives_contain_every_file_of_the_type() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;
    client.upload_bytes("x.c", "~S1/folder1", b"x").await.unwrap();
    client.upload_bytes("w.c", "~S1/folder2/deep", b"w").await.unwrap();
    client.upload_bytes("z.txt", "~S3/folder1", b"z").await.unwrap();
    client.upload_bytes("y.pdf", "~S2/folder1", b"y").await.unwrap();

    let c_tar = client.archive(".c").await.unwrap();
    assert_eq!(tar_entries(&c_tar), vec!["folder1/x.c".to_string(), "folder2/deep/w.c".to_string()]);

    let txt_tar = client.archive("txt").await.unwrap();
    assert_eq!(tar_entries(&txt_tar), vec!["folder1/z.txt".to_string()]);

    let out = tempfile::tempdir().unwrap();
    let target = out.path().join("pdf.tar");
    let n = client.archive_to(".pdf", &target).await.unwrap();
    assert_eq!(n, std::fs::metadata(&target).unwrap().len());
    assert_eq!(tar_entries(&std::fs::read(&target).unwrap()), vec!["folder1/y.pdf".to_string()]);

    // No artifacts are left behind.
    assert_eq!(std::fs::read_dir(cluster.state.tree.tmp_dir()).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_upload_distinct_files() {
    let cluster = Cluster::start(&[]).await;
    let uploads = (0..8).map(|i| {
        let addr = cluster.addr.clone();
        async move {
            let mut client = shardfs::client::CoordinatorClient::connect(&addr).await.unwrap();
            let (name, dest) = match i % 3 {
                0 => (format!("f{}.c", i), "~S1/conc"),
                1 => (format!("f{}.pdf", i), "~S2/conc"),
                _ => (format!("f{}.txt", i), "~S3/conc"),
            };
            let body = format!("payload {}", i).repeat(1000);
            client.upload_bytes(&name, dest, body.as_bytes()).await.map(|_| (name, body))
        }
    });
    let results = futures::future::join_all(uploads).await;

    let mut client = cluster.client().await;
    for r in results {
        let (name, body) = r.unwrap();
        assert_eq!(client.download(&name).await.unwrap(), body.as_bytes());
    }
    assert_eq!(client.list("conc").await.unwrap().names.len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn text_upload_is_staged_forwarded_and_indexed() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;
    let status = client.upload_bytes("a.txt", "~S3/folder1", b"hello").await.unwrap();
    assert!(status.contains("a.txt"));

    assert_eq!(std::fs::read(cluster.shard_root(".txt").join("folder1/a.txt")).unwrap(), b"hello");
    assert!(cluster.staged_files().is_empty());
    assert!(!cluster.root_path().join("folder1/a.txt").exists());
    assert_eq!(cluster.state.index.get("a.txt").unwrap().relative_path, "folder1/a.txt");

    // The snapshot has the entry once flushed.
    cluster.state.index.flush().unwrap();
    let snapshot = cluster.root_path().join(".shardfs/index.json");
    let reopened = MetadataIndex::open(&snapshot, std::time::Duration::from_secs(3_600)).unwrap();
    assert_eq!(reopened.get("a.txt").unwrap().relative_path, "folder1/a.txt");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn binary_payloads_with_marker_bytes_survive() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;

    // Several chunks worth of data with the old in-band markers sprinkled in.
    let mut body = Vec::new();
    for i in 0..20_000u32 {
        body.extend_from_slice(&i.to_le_bytes());
        if i % 997 == 0 {
            body.extend_from_slice(b"EOF");
            body.extend_from_slice(b"NOTFOUND");
        }
    }
    body.extend_from_slice(b"EOF");

    client.upload_bytes("blob.pdf", "~S2/bin", &body).await.unwrap();
    client.upload_bytes("blob.c", "~S1/bin", &body).await.unwrap();
    assert_eq!(client.download("blob.pdf").await.unwrap(), body);
    assert_eq!(client.download("blob.c").await.unwrap(), body);

    client.upload_bytes("empty.txt", "~S3", b"").await.unwrap();
    assert!(client.download("empty.txt").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_requests_keep_the_session_open() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;

    match client.raw("uploadf only_one_arg").await.unwrap() {
        Frame::Error(ShardError::MalformedCommand(m)) => assert!(m.starts_with("Usage: uploadf")),
        other => panic!("unexpected {:?}", other),
    }
    match client.raw("frobnicate now").await.unwrap() {
        Frame::Error(ShardError::UnknownCommand(m)) => assert!(m.contains("frobnicate")),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        client.upload_bytes("tool.exe", "~S1", b"MZ").await,
        Err(ShardError::UnsupportedType(_))
    ));
    assert!(matches!(
        client.upload_bytes("x.c", "~S1/../escape", b"x").await,
        Err(ShardError::MalformedCommand(_))
    ));
    assert!(matches!(client.upload_bytes("x.c", "~S9/dir", b"x").await, Err(ShardError::MalformedCommand(_))));

    client.upload_bytes("x.c", "~S1/ok", b"still alive").await.unwrap();
    assert_eq!(client.download("x.c").await.unwrap(), b"still alive");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disk_collision_fails_the_request_not_the_session() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;

    // `folder/a.c` becomes a directory, so storing a file there must fail.
    client.upload_bytes("z.c", "~S1/folder/a.c", b"z").await.unwrap();
    match client.upload_bytes("a.c", "~S1/folder", b"collides").await {
        Err(ShardError::Storage(m)) => assert!(m.contains("a.c"), "{}", m),
        other => panic!("unexpected {:?}", other),
    }
    assert!(cluster.staged_files().is_empty());
    assert!(cluster.state.index.get("a.c").is_none());
    assert_eq!(client.download("z.c").await.unwrap(), b"z");

    // Same on a shard: the error code travels back through the coordinator.
    client.upload_bytes("z.pdf", "~S2/folder/a.pdf", b"z").await.unwrap();
    match client.upload_bytes("a.pdf", "~S2/folder", b"collides").await {
        Err(ShardError::Storage(m)) => assert!(m.contains("staged copy kept at"), "{}", m),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(client.download("z.pdf").await.unwrap(), b"z");
    assert_eq!(client.list("folder").await.unwrap().names, vec!["z.c".to_string(), "z.pdf".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_download_failure_keeps_the_session() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;
    client.upload_bytes("x.c", "~S1", b"x").await.unwrap();

    let out = tempfile::tempdir().unwrap();
    let target = out.path().join("missing_dir/x.c");
    assert!(matches!(client.download_to("x.c", &target).await, Err(ShardError::Storage(_))));
    assert_eq!(client.download("x.c").await.unwrap(), b"x");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreadable_local_tree_is_a_listing_warning() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;
    client.upload_bytes("x.c", "~S1/folder1", b"x").await.unwrap();

    // Walking below a regular file fails on the coordinator; shards simply
    // have no such directory.
    let listing = client.list("folder1/x.c/sub").await.unwrap();
    assert!(listing.names.is_empty());
    assert_eq!(listing.warnings.len(), 1);
    assert!(listing.warnings[0].starts_with(".c files unavailable"), "{}", listing.warnings[0]);
    assert!(client.list("folder1").await.unwrap().is_complete());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_local_record_is_evicted_on_remove() {
    let cluster = Cluster::start(&[]).await;
    let mut client = cluster.client().await;
    client.upload_bytes("x.c", "~S1/folder1", b"x").await.unwrap();

    // The file disappears behind the coordinator's back.
    std::fs::remove_file(cluster.root_path().join("folder1/x.c")).unwrap();
    assert!(matches!(client.remove("x.c").await, Err(ShardError::NotFound(_))));
    assert!(cluster.state.index.get("x.c").is_none());
    assert!(matches!(client.download("x.c").await, Err(ShardError::NotFound(_))));
}

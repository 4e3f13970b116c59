use super::*;
use crate::protocol::{read_frame, write_frame, Frame};
use crate::tree::LocalTree;

async fn shard(dir: &std::path::Path, ext: &str, archivable: bool) -> ShardState {
    let st = ShardState { extension: ext.to_string(), archivable, tree: LocalTree::new(dir) };
    st.tree.ensure().await.unwrap();
    st
}

/// Run one request against the shard and collect every reply frame.
async fn request(state: &ShardState, frames: Vec<Frame>) -> Vec<Frame> {
    let (mut client, mut server) = tokio::io::duplex(1 << 20);
    let st = state.clone();
    let task = tokio::spawn(async move { handle_request(&mut server, &st, 1).await });
    for f in &frames {
        write_frame(&mut client, f).await.unwrap();
    }
    task.await.unwrap().unwrap();
    let mut out = Vec::new();
    while let Some(f) = read_frame(&mut client).await.unwrap() {
        out.push(f);
    }
    out
}

fn cmd(line: &str) -> Frame {
    Frame::Command(line.to_string())
}

#[tokio::test]
async fn upload_download_list_remove() {
    let tmp = tempfile::tempdir().unwrap();
    let st = shard(tmp.path(), ".pdf", true).await;

    let out = request(&st, vec![cmd("uploadf report.pdf ~S2/docs"), Frame::Data(b"%PDF-1.4".to_vec()), Frame::End]).await;
    assert_eq!(out, vec![Frame::Ready, Frame::Status("stored docs/report.pdf".into())]);
    assert_eq!(std::fs::read(tmp.path().join("docs/report.pdf")).unwrap(), b"%PDF-1.4");

    let out = request(&st, vec![cmd("downlf docs/report.pdf")]).await;
    assert_eq!(out, vec![Frame::Data(b"%PDF-1.4".to_vec()), Frame::End]);

    let out = request(&st, vec![cmd("dispfnames docs")]).await;
    assert_eq!(out, vec![Frame::Data(b"report.pdf\n".to_vec()), Frame::End]);

    let out = request(&st, vec![cmd("removef report.pdf")]).await;
    assert_eq!(out, vec![Frame::Status(REMOVED_STATUS.into())]);
    assert!(!tmp.path().join("docs/report.pdf").exists());

    let out = request(&st, vec![cmd("removef report.pdf")]).await;
    assert!(matches!(&out[..], [Frame::Error(ShardError::NotFound(_))]));
}

#[tokio::test]
async fn foreign_extensions_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let st = shard(tmp.path(), ".pdf", true).await;

    let out = request(&st, vec![cmd("uploadf notes.txt ~S2/docs")]).await;
    assert!(matches!(&out[..], [Frame::Error(ShardError::UnsupportedType(_))]));

    let out = request(&st, vec![cmd("downltar .txt")]).await;
    assert!(matches!(&out[..], [Frame::Error(ShardError::UnsupportedType(_))]));

    // Deleting a foreign type is simply not found here.
    let out = request(&st, vec![cmd("removef notes.txt")]).await;
    assert!(matches!(&out[..], [Frame::Error(ShardError::NotFound(_))]));
}

#[tokio::test]
async fn missing_download_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let st = shard(tmp.path(), ".txt", true).await;
    let out = request(&st, vec![cmd("downlf nowhere/a.txt")]).await;
    assert!(matches!(&out[..], [Frame::Error(ShardError::NotFound(_))]));
}

#[tokio::test]
async fn remove_finds_file_anywhere_in_tree() {
    let tmp = tempfile::tempdir().unwrap();
    let st = shard(tmp.path(), ".txt", true).await;
    std::fs::create_dir_all(tmp.path().join("a/b/c")).unwrap();
    std::fs::write(tmp.path().join("a/b/c/deep.txt"), b"x").unwrap();

    let out = request(&st, vec![cmd("removef deep.txt")]).await;
    assert_eq!(out, vec![Frame::Status(REMOVED_STATUS.into())]);
    assert!(!tmp.path().join("a/b/c/deep.txt").exists());
}

#[tokio::test]
async fn archive_contains_own_files_only() {
    let tmp = tempfile::tempdir().unwrap();
    let st = shard(tmp.path(), ".txt", true).await;
    std::fs::create_dir_all(tmp.path().join("folder1")).unwrap();
    std::fs::write(tmp.path().join("folder1/z.txt"), b"zzz").unwrap();
    std::fs::write(tmp.path().join("folder1/ignored.pdf"), b"pdf").unwrap();

    let out = request(&st, vec![cmd("downltar txt")]).await;
    assert_eq!(out.last(), Some(&Frame::End));
    let mut blob = Vec::new();
    for f in &out[..out.len() - 1] {
        match f {
            Frame::Data(d) => blob.extend_from_slice(d),
            other => panic!("unexpected frame {:?}", other),
        }
    }
    let mut archive = tar::Archive::new(&blob[..]);
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["folder1/z.txt".to_string()]);

    // The artifact is gone once streamed.
    let leftovers = std::fs::read_dir(st.tree.tmp_dir()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn non_archivable_shard_refuses_archives() {
    let tmp = tempfile::tempdir().unwrap();
    let st = shard(tmp.path(), ".zip", false).await;
    let out = request(&st, vec![cmd("downltar .zip")]).await;
    match &out[..] {
        [Frame::Error(ShardError::UnsupportedType(m))] => assert!(m.contains("not offered")),
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn unknown_command_gets_error_frame() {
    let tmp = tempfile::tempdir().unwrap();
    let st = shard(tmp.path(), ".pdf", true).await;
    let out = request(&st, vec![cmd("frobnicate x")]).await;
    assert!(matches!(&out[..], [Frame::Error(ShardError::UnknownCommand(_))]));
}

//! Concrete end-to-end scenarios against a real (in-process) cluster,
//! grounded on `examples/aankur-garage/src/garage/tests/k2v/simple.rs`'s
//! style of driving a running server through its client helpers rather
//! than unit-testing internals directly.
use std::time::Duration;

use crate::common::{spawn_cluster, spawn_cluster_with_replication};

async fn write_tmp_file(dir: &tempfile::TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
	let path = dir.path().join(name);
	tokio::fs::write(&path, contents).await.unwrap();
	path
}

#[tokio::test]
async fn simple_upload_download_round_trip() {
	let cluster = spawn_cluster(3).await;
	let tmp = tempfile::tempdir().unwrap();

	let contents = b"hello strata\n".repeat(500);
	let src = write_tmp_file(&tmp, "src.bin", &contents).await;

	let ok = strata_client::upload_file(cluster.coordinator_addr, &src, Some("greeting.bin"), "/")
		.await
		.unwrap();
	assert!(ok, "upload should succeed with three live block servers");

	let listing = strata_client::coordinator_client::list_directory(cluster.coordinator_addr, "/")
		.await
		.unwrap()
		.unwrap();
	let entry = listing.iter().find(|e| e.name == "greeting.bin").unwrap();
	assert_eq!(entry.entry_type, "file");
	assert_eq!(entry.size, Some(contents.len() as u64));

	let dest = tmp.path().join("dest.bin");
	let ok = strata_client::download_file(cluster.coordinator_addr, "greeting.bin", "/", &dest)
		.await
		.unwrap();
	assert!(ok);

	let roundtripped = tokio::fs::read(&dest).await.unwrap();
	assert_eq!(roundtripped, contents);
}

#[tokio::test]
async fn empty_file_round_trip() {
	let cluster = spawn_cluster(2).await;
	let tmp = tempfile::tempdir().unwrap();
	let src = write_tmp_file(&tmp, "empty.bin", b"").await;

	let ok = strata_client::upload_file(cluster.coordinator_addr, &src, Some("empty.bin"), "/")
		.await
		.unwrap();
	assert!(ok, "a zero-byte file has zero blocks to write and should upload trivially");

	let metadata = strata_client::coordinator_client::get_file_metadata(cluster.coordinator_addr, "empty.bin", "/")
		.await
		.unwrap()
		.unwrap();
	assert_eq!(metadata.total_size, 0);
	assert!(metadata.blocks.is_empty());

	let dest = tmp.path().join("empty_out.bin");
	let ok = strata_client::download_file(cluster.coordinator_addr, "empty.bin", "/", &dest)
		.await
		.unwrap();
	assert!(ok);
	assert_eq!(tokio::fs::read(&dest).await.unwrap().len(), 0);
}

#[tokio::test]
async fn directory_delete_cascade_removes_files_and_subdirectories() {
	let cluster = spawn_cluster(3).await;
	let tmp = tempfile::tempdir().unwrap();

	let (ok, _) = strata_client::coordinator_client::create_directory(cluster.coordinator_addr, "/x")
		.await
		.unwrap();
	assert!(ok);
	let (ok, _) = strata_client::coordinator_client::create_directory(cluster.coordinator_addr, "/x/y")
		.await
		.unwrap();
	assert!(ok);

	let a = write_tmp_file(&tmp, "a.bin", &vec![7u8; 200 * 1024]).await;
	let b = write_tmp_file(&tmp, "b.bin", &vec![9u8; 100 * 1024]).await;

	assert!(strata_client::upload_file(cluster.coordinator_addr, &a, Some("a.bin"), "/x")
		.await
		.unwrap());
	assert!(strata_client::upload_file(cluster.coordinator_addr, &b, Some("b.bin"), "/x/y")
		.await
		.unwrap());

	let result = strata_client::coordinator_client::delete_directory(cluster.coordinator_addr, "/x")
		.await
		.unwrap()
		.expect("deleting a directory with contents should succeed");

	assert_eq!(result.deleted_files, 2);
	assert_eq!(result.deleted_directories, 2, "both /x and /x/y should be removed");
	// 200 KiB and 100 KiB at a 64 KiB block size -> 4 + 2 blocks.
	assert_eq!(result.blocks_info.len(), 6);

	assert!(!strata_client::coordinator_client::path_exists(cluster.coordinator_addr, "/x")
		.await
		.unwrap());
	assert!(!strata_client::coordinator_client::path_exists(cluster.coordinator_addr, "/x/y")
		.await
		.unwrap());
}

#[tokio::test]
async fn concurrent_mkdir_of_same_path_has_exactly_one_winner() {
	let cluster = spawn_cluster(1).await;
	let addr = cluster.coordinator_addr;

	let (a, b) = tokio::join!(
		strata_client::coordinator_client::create_directory(addr, "/race"),
		strata_client::coordinator_client::create_directory(addr, "/race"),
	);
	let (ok_a, _) = a.unwrap();
	let (ok_b, _) = b.unwrap();
	assert_eq!(
		(ok_a as u8) + (ok_b as u8),
		1,
		"exactly one of two concurrent mkdirs for the same path should succeed"
	);
}

/// Scenario: one block server stops accepting connections (process
/// death) while its heartbeat task keeps running, so the coordinator
/// still considers it live and may hand it out as an upload target or
/// list it among a block's replicas. Upload must route around the
/// failure via per-block node exclusion/retry, and download must fail
/// over to a replica that is actually reachable.
#[tokio::test]
async fn upload_and_download_survive_one_unreachable_node() {
	let cluster = spawn_cluster_with_replication(3, 3).await;
	cluster.kill_block_server(0);

	let tmp = tempfile::tempdir().unwrap();
	let contents = vec![42u8; 300 * 1024];
	let src = write_tmp_file(&tmp, "src.bin", &contents).await;

	let ok = strata_client::upload_file(cluster.coordinator_addr, &src, Some("survivor.bin"), "/")
		.await
		.unwrap();
	assert!(ok, "upload should route blocks around the unreachable node");

	// Give the fire-and-forget replication dispatcher time to push
	// copies out to the still-reachable nodes before reading back.
	tokio::time::sleep(Duration::from_millis(500)).await;

	let dest = tmp.path().join("dest.bin");
	let ok = strata_client::download_file(cluster.coordinator_addr, "survivor.bin", "/", &dest)
		.await
		.unwrap();
	assert!(ok, "download should fail over to a reachable replica");
	assert_eq!(tokio::fs::read(&dest).await.unwrap(), contents);
}

#[tokio::test]
async fn name_resolution_is_equivalent_for_relative_and_absolute_paths() {
	let cluster = spawn_cluster(2).await;
	let tmp = tempfile::tempdir().unwrap();

	let (ok, _) = strata_client::coordinator_client::create_directory(cluster.coordinator_addr, "/docs")
		.await
		.unwrap();
	assert!(ok);

	let src = write_tmp_file(&tmp, "note.txt", b"relative vs absolute").await;
	assert!(strata_client::upload_file(cluster.coordinator_addr, &src, Some("note.txt"), "/docs")
		.await
		.unwrap());

	let via_relative = strata_client::coordinator_client::get_file_metadata(cluster.coordinator_addr, "note.txt", "/docs")
		.await
		.unwrap()
		.unwrap();
	let via_absolute = strata_client::coordinator_client::get_file_metadata(cluster.coordinator_addr, "/docs/note.txt", "/")
		.await
		.unwrap()
		.unwrap();

	assert_eq!(via_relative.storage_name, via_absolute.storage_name);
	assert_eq!(via_relative.full_path, via_absolute.full_path);
}

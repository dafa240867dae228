// Tests for the OpenSSH transport
// ssh and scp are replaced by shell stubs that log their arguments

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fleetsync::transfer::{HostSession, SshOptions, SshTransfer, TransferClient};
use fleetsync::TransferError;
use tempfile::TempDir;

/// Stub binaries plus a fake remote filesystem rooted at `remote`.
struct StubTools {
    dir: TempDir,
    remote: PathBuf,
    calls: PathBuf,
}

impl StubTools {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("remote");
        let calls = dir.path().join("calls.log");
        fs::create_dir_all(&remote).unwrap();

        // Refuses any host named badhost, as an unreachable peer would.
        write_script(
            &dir.path().join("ssh"),
            &format!(
                "echo \"ssh $*\" >> '{calls}'\n\
                 case \"$*\" in *badhost*) exit 255 ;; esac\n\
                 exit 0\n",
                calls = calls.display()
            ),
        );

        // Copies <remote><path> to the destination argument.
        write_script(
            &dir.path().join("scp"),
            &format!(
                "echo \"scp $*\" >> '{calls}'\n\
                 src=''\n\
                 dest=''\n\
                 for arg in \"$@\"; do src=\"$dest\"; dest=\"$arg\"; done\n\
                 path=\"${{src#*:}}\"\n\
                 cp '{remote}'\"$path\" \"$dest\" 2>/dev/null || {{ echo \"scp: $path: No such file or directory\" >&2; exit 1; }}\n",
                calls = calls.display(),
                remote = remote.display()
            ),
        );

        Self { dir, remote, calls }
    }

    fn options(&self) -> SshOptions {
        SshOptions {
            user: "deploy".to_string(),
            connect_timeout: Duration::from_secs(7),
            ssh_program: self.dir.path().join("ssh").display().to_string(),
            scp_program: self.dir.path().join("scp").display().to_string(),
            ..SshOptions::default()
        }
    }

    fn put_remote(&self, path: &str, content: &[u8]) {
        let full = self.remote.join(path.trim_start_matches('/'));
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.calls)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{}", body)).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn test_session_lifecycle_and_arguments() {
    let tools = StubTools::new();
    let local = tempfile::tempdir().unwrap();
    let target = local.path().join("nested/dir/part-0.parquet");
    let target_str = target.display().to_string();
    tools.put_remote(&target_str, b"rows");

    let transfer = SshTransfer::new(tools.options()).unwrap();
    let mut session = transfer.connect("web-2").await.unwrap();
    assert_eq!(session.host(), "web-2");

    session.fetch(&target_str).await.unwrap();
    session.close().await;

    // Parent directories were created before scp ran.
    assert_eq!(fs::read(&target).unwrap(), b"rows");

    let calls = tools.calls();
    assert_eq!(calls.len(), 3);

    let master = &calls[0];
    assert!(master.starts_with("ssh -M -S "));
    assert!(master.contains("web-2.sock -fN -E "));
    assert!(master.contains("-o ControlPersist=yes -o BatchMode=yes -o ConnectTimeout=7"));
    assert!(master.ends_with(" deploy@web-2"));

    let copy = &calls[1];
    assert!(copy.starts_with("scp -q -o ControlPath="));
    assert!(copy.contains("web-2.sock -o BatchMode=yes"));
    assert!(copy.ends_with(&format!(" deploy@web-2:{} {}", target_str, target_str)));

    let exit = &calls[2];
    assert!(exit.starts_with("ssh -S "));
    assert!(exit.ends_with("web-2.sock -O exit deploy@web-2"));
}

#[tokio::test]
async fn test_refused_handshake_is_connection_error() {
    let tools = StubTools::new();
    let transfer = SshTransfer::new(tools.options()).unwrap();

    let err = transfer.connect("badhost").await.err().unwrap();

    assert!(err.is_connection());
    assert_eq!(err.to_string(), "could not connect to badhost: exit status: 255");
    // No scp is attempted for a host that never connected.
    assert_eq!(tools.calls().len(), 1);
}

#[tokio::test]
async fn test_missing_remote_file_is_file_error() {
    let tools = StubTools::new();
    let local = tempfile::tempdir().unwrap();
    let target = local.path().join("opt/data/missing.parquet").display().to_string();

    let transfer = SshTransfer::new(tools.options()).unwrap();
    let mut session = transfer.connect("web-2").await.unwrap();
    let err = session.fetch(&target).await.unwrap_err();
    session.close().await;

    match err {
        TransferError::File { host, path, reason } => {
            assert_eq!(host, "web-2");
            assert_eq!(path, target);
            assert!(reason.starts_with("exit status: 1: scp: "));
            assert!(reason.ends_with("No such file or directory"));
        }
        other => panic!("expected a file error, got {:?}", other),
    }
    assert!(tools.calls().last().unwrap().contains("-O exit"));
}

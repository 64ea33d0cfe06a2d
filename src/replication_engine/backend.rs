//! Transfer backends
//!
//! Pluggable destination adapters behind one trait: a remote-sync tool
//! (rsync over ssh or local), a multi-protocol copy tool (rclone), and a
//! plain local-mount copy. The engine stays agnostic of how bytes move
//! and how the remote side reports usage and digests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Destination usage snapshot
#[derive(Debug, Clone, Copy)]
pub struct RemoteUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub usage_percent: f64,
}

impl RemoteUsage {
    pub fn from_totals(total_bytes: u64, available_bytes: u64) -> Self {
        let used = total_bytes.saturating_sub(available_bytes);
        let usage_percent = if total_bytes > 0 {
            used as f64 / total_bytes as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total_bytes,
            available_bytes,
            usage_percent,
        }
    }
}

/// Transfer engine selection (config value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferEngineKind {
    Rsync,
    Rclone,
    LocalMount,
}

impl TransferEngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferEngineKind::Rsync => "rsync",
            TransferEngineKind::Rclone => "rclone",
            TransferEngineKind::LocalMount => "local_mount",
        }
    }
}

/// Destination adapter
#[async_trait]
pub trait TransferBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reachability probe + usage statistics
    async fn probe(&self) -> crate::Result<RemoteUsage>;

    /// Copy one file to the destination-relative path
    async fn transfer(&self, local: &Path, remote_rel: &Path) -> crate::Result<()>;

    /// SHA-256 of the remote copy; `None` when the backend cannot compute one
    async fn remote_digest(&self, remote_rel: &Path) -> crate::Result<Option<String>>;
}

/// Build the backend selected by config
pub fn build_backend(
    kind: TransferEngineKind,
    destination: &str,
) -> Box<dyn TransferBackend> {
    match kind {
        TransferEngineKind::Rsync => Box::new(RsyncBackend::new(destination)),
        TransferEngineKind::Rclone => Box::new(RcloneBackend::new(destination)),
        TransferEngineKind::LocalMount => Box::new(LocalMountBackend::new(destination)),
    }
}

/// SHA-256 of a local file, streamed off the async runtime
pub async fn sha256_file(path: &Path) -> crate::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> crate::Result<String> {
        use std::io::Read;
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 65536];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| crate::Error::Internal(format!("digest task failed: {}", e)))?
}

async fn run_tool(program: &str, args: &[String]) -> crate::Result<String> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| crate::Error::Replication(format!("{} spawn failed: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(crate::Error::Replication(format!(
            "{} failed ({}): {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ========================================
// Local mount
// ========================================

/// Copy to a locally mounted destination directory
pub struct LocalMountBackend {
    dest_root: PathBuf,
}

impl LocalMountBackend {
    pub fn new(destination: &str) -> Self {
        Self {
            dest_root: PathBuf::from(destination),
        }
    }

    fn full_path(&self, remote_rel: &Path) -> PathBuf {
        self.dest_root.join(remote_rel)
    }
}

#[async_trait]
impl TransferBackend for LocalMountBackend {
    fn name(&self) -> &'static str {
        "local_mount"
    }

    async fn probe(&self) -> crate::Result<RemoteUsage> {
        if !self.dest_root.exists() {
            return Err(crate::Error::Replication(format!(
                "destination not mounted: {}",
                self.dest_root.display()
            )));
        }
        let (total, available) = crate::storage_guardian::mount_stats(&self.dest_root)?;
        Ok(RemoteUsage::from_totals(total, available))
    }

    async fn transfer(&self, local: &Path, remote_rel: &Path) -> crate::Result<()> {
        let dest = self.full_path(remote_rel);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &dest).await?;
        Ok(())
    }

    async fn remote_digest(&self, remote_rel: &Path) -> crate::Result<Option<String>> {
        let dest = self.full_path(remote_rel);
        Ok(Some(sha256_file(&dest).await?))
    }
}

// ========================================
// rsync
// ========================================

/// Remote-sync tool; destination is `path` or `host:path`
pub struct RsyncBackend {
    /// Set when the destination names a remote host
    ssh_host: Option<String>,
    remote_path: String,
}

impl RsyncBackend {
    pub fn new(destination: &str) -> Self {
        // "host:path" (single colon, not a Windows drive) means remote
        let (ssh_host, remote_path) = match destination.split_once(':') {
            Some((host, path)) if !host.is_empty() && !path.is_empty() => {
                (Some(host.to_string()), path.to_string())
            }
            _ => (None, destination.to_string()),
        };
        Self {
            ssh_host,
            remote_path,
        }
    }
}

#[async_trait]
impl TransferBackend for RsyncBackend {
    fn name(&self) -> &'static str {
        "rsync"
    }

    async fn probe(&self) -> crate::Result<RemoteUsage> {
        match &self.ssh_host {
            Some(host) => {
                let out = run_tool(
                    "ssh",
                    &[
                        host.clone(),
                        format!("df -Pk {}", self.remote_path),
                    ],
                )
                .await?;
                parse_df_output(&out)
            }
            None => {
                let path = PathBuf::from(&self.remote_path);
                if !path.exists() {
                    return Err(crate::Error::Replication(format!(
                        "destination not reachable: {}",
                        path.display()
                    )));
                }
                let (total, available) = crate::storage_guardian::mount_stats(&path)?;
                Ok(RemoteUsage::from_totals(total, available))
            }
        }
    }

    async fn transfer(&self, local: &Path, remote_rel: &Path) -> crate::Result<()> {
        let full = format!(
            "{}/{}",
            self.remote_path.trim_end_matches('/'),
            remote_rel.display()
        );
        let parent = Path::new(&full)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| self.remote_path.clone());

        match &self.ssh_host {
            Some(host) => {
                run_tool("ssh", &[host.clone(), format!("mkdir -p {}", parent)]).await?;
                run_tool(
                    "rsync",
                    &[
                        "-a".to_string(),
                        "--partial".to_string(),
                        local.display().to_string(),
                        format!("{}:{}", host, full),
                    ],
                )
                .await?;
            }
            None => {
                tokio::fs::create_dir_all(&parent).await?;
                run_tool(
                    "rsync",
                    &[
                        "-a".to_string(),
                        "--partial".to_string(),
                        local.display().to_string(),
                        full,
                    ],
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn remote_digest(&self, remote_rel: &Path) -> crate::Result<Option<String>> {
        let full = format!(
            "{}/{}",
            self.remote_path.trim_end_matches('/'),
            remote_rel.display()
        );
        match &self.ssh_host {
            Some(host) => {
                let out =
                    run_tool("ssh", &[host.clone(), format!("sha256sum {}", full)]).await?;
                let digest = out
                    .split_whitespace()
                    .next()
                    .map(|s| s.to_string())
                    .ok_or_else(|| {
                        crate::Error::Parse(format!("unexpected sha256sum output: {}", out))
                    })?;
                Ok(Some(digest))
            }
            None => Ok(Some(sha256_file(Path::new(&full)).await?)),
        }
    }
}

// ========================================
// rclone
// ========================================

/// Multi-protocol copy tool; destination is an rclone remote spec
pub struct RcloneBackend {
    remote: String,
}

impl RcloneBackend {
    pub fn new(destination: &str) -> Self {
        Self {
            remote: destination.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TransferBackend for RcloneBackend {
    fn name(&self) -> &'static str {
        "rclone"
    }

    async fn probe(&self) -> crate::Result<RemoteUsage> {
        let out = run_tool(
            "rclone",
            &["about".to_string(), "--json".to_string(), self.remote.clone()],
        )
        .await?;
        let about: serde_json::Value = serde_json::from_str(&out)?;
        let total = about["total"].as_u64().unwrap_or(0);
        let free = about["free"].as_u64().unwrap_or(total);
        // Some remotes report no quota at all; treat as unconstrained
        Ok(RemoteUsage::from_totals(total, free))
    }

    async fn transfer(&self, local: &Path, remote_rel: &Path) -> crate::Result<()> {
        run_tool(
            "rclone",
            &[
                "copyto".to_string(),
                local.display().to_string(),
                format!("{}/{}", self.remote, remote_rel.display()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn remote_digest(&self, remote_rel: &Path) -> crate::Result<Option<String>> {
        let out = run_tool(
            "rclone",
            &[
                "hashsum".to_string(),
                "sha256".to_string(),
                format!("{}/{}", self.remote, remote_rel.display()),
            ],
        )
        .await?;
        // Not every remote supports sha256; rclone prints an empty list then
        Ok(out.split_whitespace().next().map(|s| s.to_string()))
    }
}

/// Parse `df -Pk` output (1024-byte blocks) into usage totals
fn parse_df_output(out: &str) -> crate::Result<RemoteUsage> {
    let line = out
        .lines()
        .nth(1)
        .ok_or_else(|| crate::Error::Parse(format!("unexpected df output: {}", out)))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(crate::Error::Parse(format!("unexpected df line: {}", line)));
    }
    let total_kb: u64 = fields[1]
        .parse()
        .map_err(|_| crate::Error::Parse(format!("bad df total: {}", fields[1])))?;
    let avail_kb: u64 = fields[3]
        .parse()
        .map_err(|_| crate::Error::Parse(format!("bad df avail: {}", fields[3])))?;
    Ok(RemoteUsage::from_totals(total_kb * 1024, avail_kb * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_df_output() {
        let out = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                   /dev/sda1  1000000     800000 200000   80%      /backup\n";
        let usage = parse_df_output(out).unwrap();
        assert_eq!(usage.total_bytes, 1_024_000_000);
        assert_eq!(usage.available_bytes, 204_800_000);
        assert!((usage.usage_percent - 80.0).abs() < 0.01);
    }

    #[test]
    fn test_rsync_destination_parsing() {
        let remote = RsyncBackend::new("backup-host:/srv/archive");
        assert_eq!(remote.ssh_host.as_deref(), Some("backup-host"));
        assert_eq!(remote.remote_path, "/srv/archive");

        let local = RsyncBackend::new("/mnt/archive");
        assert!(local.ssh_host.is_none());
        assert_eq!(local.remote_path, "/mnt/archive");
    }

    #[tokio::test]
    async fn test_local_mount_transfer_and_digest() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let src = src_dir.path().join("a_000.mp4");
        tokio::fs::write(&src, b"segment-bytes").await.unwrap();

        let backend = LocalMountBackend::new(&dst_dir.path().display().to_string());
        backend
            .transfer(&src, Path::new("s/2026-03-14/camera_c1/a_000.mp4"))
            .await
            .unwrap();

        let copied = dst_dir.path().join("s/2026-03-14/camera_c1/a_000.mp4");
        assert!(copied.exists());

        let local_digest = sha256_file(&src).await.unwrap();
        let remote_digest = backend
            .remote_digest(Path::new("s/2026-03-14/camera_c1/a_000.mp4"))
            .await
            .unwrap();
        assert_eq!(remote_digest.as_deref(), Some(local_digest.as_str()));
    }

    #[tokio::test]
    async fn test_local_mount_probe_unreachable() {
        let backend = LocalMountBackend::new("/nonexistent/is24/backup");
        assert!(backend.probe().await.is_err());
    }
}

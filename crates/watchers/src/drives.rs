//! Mounted drives, polled through `sysinfo`

use std::{
	collections::HashSet,
	io,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sysinfo::Disks;
use tokio::{fs, task::spawn_blocking};
use tracing::trace;
use wk_change_source::{Enumeration, Enumerator, PollingSource, SourceError};
use wk_reconcile::{
	CollectionSnapshot, EnrichError, Enricher, Entity, EntityKind, ReconciledCollection,
	Reconciler, ReconcilerConfig, RefreshOutcome, SortOrder,
};
use wk_utils::{error::FileIOError, path_key};

pub type DriveSource = PollingSource<SystemDisks>;
pub type DrivesReconciler = Reconciler<DriveSource, DriveEnricher>;

/// What the OS tells us about a mounted disk.
///
/// No free space: it changes between any two polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
	pub name: String,
	pub mount_point: PathBuf,
	pub file_system: String,
	pub removable: bool,
	pub total_space: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveType {
	Fixed,
	Removable,
	Network,
	CdRom,
	Ram,
	FloppyDisk,
	Unknown,
}

const NETWORK_FILE_SYSTEMS: [&str; 9] = [
	"nfs", "nfs4", "cifs", "smbfs", "smb2", "afpfs", "sshfs", "fuse.sshfs", "9p",
];

const OPTICAL_FILE_SYSTEMS: [&str; 3] = ["iso9660", "udf", "cdfs"];

const RAM_FILE_SYSTEMS: [&str; 2] = ["tmpfs", "ramfs"];

impl DriveType {
	pub fn classify(disk: &DiskInfo) -> Self {
		let file_system = disk.file_system.to_lowercase();
		let mount_point = path_key(&disk.mount_point);

		if mount_point.is_empty() {
			Self::Unknown
		} else if is_floppy_root(&mount_point) {
			Self::FloppyDisk
		} else if mount_point.starts_with(r"\\") || NETWORK_FILE_SYSTEMS.contains(&file_system.as_str())
		{
			Self::Network
		} else if OPTICAL_FILE_SYSTEMS.contains(&file_system.as_str()) {
			Self::CdRom
		} else if RAM_FILE_SYSTEMS.contains(&file_system.as_str()) {
			Self::Ram
		} else if disk.removable {
			Self::Removable
		} else {
			Self::Fixed
		}
	}
}

fn is_floppy_root(mount_point: &str) -> bool {
	let drive = mount_point.trim_end_matches('\\');
	drive.eq_ignore_ascii_case("A:") || drive.eq_ignore_ascii_case("B:")
}

/// `/` on unix-likes, `C:\` on Windows
pub fn is_system_drive(path: impl AsRef<Path>) -> bool {
	let path = path_key(path);
	path == "/" || path.trim_end_matches('\\').eq_ignore_ascii_case("C:")
}

fn is_virtual_filesystem(file_system: &str) -> bool {
	matches!(
		file_system.to_lowercase().as_str(),
		"devfs" | "sysfs" | "proc" | "tmpfs" | "ramfs" | "devtmpfs" | "overlay" | "squashfs"
	)
}

/// Lists mounted disks, skipping pseudo file systems unless asked not to
#[derive(Debug, Clone, Default)]
pub struct SystemDisks {
	include_virtual: bool,
}

impl SystemDisks {
	#[must_use]
	pub const fn including_virtual(mut self) -> Self {
		self.include_virtual = true;
		self
	}
}

#[async_trait]
impl Enumerator for SystemDisks {
	type Item = DiskInfo;

	async fn enumerate(&self) -> Result<Enumeration<DiskInfo>, SourceError> {
		let include_virtual = self.include_virtual;

		let items = spawn_blocking(move || {
			let disks = Disks::new_with_refreshed_list();
			let mut seen = HashSet::new();

			disks
				.iter()
				.filter(|disk| {
					include_virtual || !is_virtual_filesystem(&disk.file_system().to_string_lossy())
				})
				.map(|disk| DiskInfo {
					name: disk.name().to_string_lossy().into_owned(),
					mount_point: disk.mount_point().to_path_buf(),
					file_system: disk.file_system().to_string_lossy().into_owned(),
					removable: disk.is_removable(),
					total_space: disk.total_space(),
				})
				// Bind mounts show up once per mount of the same disk
				.filter(|disk| seen.insert(path_key(&disk.mount_point)))
				.map(|disk| (path_key(&disk.mount_point), disk))
				.collect::<Vec<_>>()
		})
		.await?;

		trace!(count = items.len(), "Enumerated disks;");

		Ok(Enumeration::complete(items))
	}
}

fn display_name(disk: &DiskInfo) -> String {
	if !disk.name.is_empty() && !disk.name.starts_with("/dev/") {
		return disk.name.clone();
	}

	disk.mount_point.file_name().map_or_else(
		|| path_key(&disk.mount_point),
		|name| name.to_string_lossy().into_owned(),
	)
}

/// Checks the drive can be opened and describes it
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveEnricher;

#[async_trait]
impl Enricher<DiskInfo> for DriveEnricher {
	async fn enrich(&self, key: &str, disk: DiskInfo) -> Result<Option<Entity>, EnrichError> {
		if let Err(e) = fs::read_dir(&disk.mount_point).await {
			return match e.kind() {
				io::ErrorKind::NotFound => Ok(None),
				io::ErrorKind::PermissionDenied => Err(EnrichError::inaccessible(key)),
				_ => Err(FileIOError::from((&disk.mount_point, e, "opening drive root")).into()),
			};
		}

		let drive_type = DriveType::classify(&disk);

		Ok(Some(
			Entity::new(key, EntityKind::Drive, disk.mount_point.clone())
				.with_name(display_name(&disk))
				.with_pinned(is_system_drive(&disk.mount_point))
				.with_metadata(json!({
					"drive_type": drive_type,
					"file_system": disk.file_system,
					"removable": disk.removable,
					"total_space": disk.total_space,
				})),
		))
	}
}

pub fn drive_type(entity: &Entity) -> Option<DriveType> {
	entity
		.metadata_field("drive_type")
		.cloned()
		.and_then(|value| serde_json::from_value(value).ok())
}

/// Whether the user should be asked to grant access: the last cycle couldn't read everything
/// and no fixed system drive made it into the collection.
pub fn needs_access_prompt(outcome: &RefreshOutcome, snapshot: &CollectionSnapshot) -> bool {
	outcome.partial
		&& !snapshot.iter().any(|entity| {
			entity.kind == EntityKind::Drive
				&& is_system_drive(&entity.path)
				&& drive_type(entity) != Some(DriveType::Removable)
		})
}

pub fn order() -> SortOrder {
	SortOrder::DisplayName
}

pub fn reconciler(
	collection: Arc<ReconciledCollection>,
	poll_interval: Duration,
	config: ReconcilerConfig,
) -> DrivesReconciler {
	Reconciler::new(
		Arc::new(PollingSource::new(
			"drives",
			SystemDisks::default(),
			poll_interval,
		)),
		DriveEnricher,
		collection,
		config.with_scope(EntityKind::Drive),
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn disk(mount_point: &str, file_system: &str, removable: bool) -> DiskInfo {
		DiskInfo {
			name: String::new(),
			mount_point: mount_point.into(),
			file_system: file_system.into(),
			removable,
			total_space: 1 << 30,
		}
	}

	#[test]
	fn classifies_drive_types() {
		assert_eq!(DriveType::classify(&disk("/", "ext4", false)), DriveType::Fixed);
		assert_eq!(
			DriveType::classify(&disk("/media/usb", "vfat", true)),
			DriveType::Removable
		);
		assert_eq!(
			DriveType::classify(&disk("/mnt/share", "NFS4", false)),
			DriveType::Network
		);
		assert_eq!(
			DriveType::classify(&disk(r"\\server\share", "", false)),
			DriveType::Network
		);
		assert_eq!(
			DriveType::classify(&disk("/media/cdrom", "iso9660", true)),
			DriveType::CdRom
		);
		assert_eq!(DriveType::classify(&disk("/tmp", "tmpfs", false)), DriveType::Ram);
		assert_eq!(
			DriveType::classify(&disk(r"A:\", "fat12", true)),
			DriveType::FloppyDisk
		);
		assert_eq!(DriveType::classify(&disk("", "ext4", false)), DriveType::Unknown);
	}

	#[test]
	fn system_drives() {
		assert!(is_system_drive("/"));
		assert!(is_system_drive(r"C:\"));
		assert!(is_system_drive("c:"));
		assert!(!is_system_drive(r"D:\"));
		assert!(!is_system_drive("/home"));
	}

	#[test]
	fn display_name_prefers_label() {
		let mut usb = disk("/media/me/STICK", "vfat", true);
		assert_eq!(display_name(&usb), "STICK");

		usb.name = "/dev/sdb1".into();
		assert_eq!(display_name(&usb), "STICK");

		usb.name = "Backup".into();
		assert_eq!(display_name(&usb), "Backup");

		assert_eq!(display_name(&disk("/", "ext4", false)), "/");
	}
}

//! Memory sources: where queue files live and which page size rounds
//! their allocations.
//!
//! A [`MemorySource`] resolves a queue name to a file handle plus the page
//! size to round allocations up to. [`DefaultMemorySource`] discovers
//! backing directories by scanning the host mount table for tmpfs (regular
//! pages) and hugetlbfs (2 MiB / 1 GiB pages) mounts; the scan runs once
//! per process. [`AnonymousMemorySource`] backs queues with memfds that no
//! other process can open by name, which is useful for tests and parent/child
//! setups that pass descriptors explicitly.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{QueueError, Result};
use crate::file::File;

/// How a source should treat a missing queue file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlags {
    /// Fail if the queue file does not exist.
    OpenOnly,
    /// Create the queue file when missing.
    OpenOrCreate,
}

/// Produces a file handle plus the page size to round allocations up to.
pub trait MemorySource {
    /// Opens (or creates) the backing file for queue `name`.
    ///
    /// The returned page size is a power of two.
    fn open(&self, name: &str, flags: OpenFlags) -> Result<(File, usize)>;
}

/// Hugepage preference for [`DefaultMemorySource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HugePagesOption {
    /// Prefer 1 GiB pages, then 2 MiB pages, then regular pages.
    Auto,
    /// Require a hugetlbfs mount with 2 MiB pages.
    HugePages2M,
    /// Require a hugetlbfs mount with 1 GiB pages.
    HugePages1G,
    /// Regular pages on a tmpfs mount (`/dev/shm`, falling back to `/tmp`).
    None,
}

const PAGE_SIZE_2M: usize = 2 * 1024 * 1024;
const PAGE_SIZE_1G: usize = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
struct MountPoint {
    path: PathBuf,
    page_size: usize,
}

/// Parses a `pagesize=` mount option from a hugetlbfs opts string.
fn page_size_from_mount_opts(opts: &str) -> Option<usize> {
    for option in opts.split(',') {
        if let Some(value) = option.strip_prefix("pagesize=") {
            return match value {
                "2M" => Some(PAGE_SIZE_2M),
                "1G" => Some(PAGE_SIZE_1G),
                _ => None,
            };
        }
    }
    None
}

/// Parses the `Hugepagesize:` line of `/proc/meminfo`.
fn parse_default_huge_page_size(meminfo: &str) -> Option<usize> {
    for line in meminfo.lines() {
        let Some(rest) = line.strip_prefix("Hugepagesize:") else {
            continue;
        };
        let rest = rest.trim();
        let kib = rest.strip_suffix("kB")?.trim();
        return kib.parse::<usize>().ok().map(|v| v * 1024);
    }
    None
}

/// Parses `/proc/mounts`, keeping tmpfs and hugetlbfs entries.
fn parse_mounts(mounts: &str, page_size: usize, default_huge: Option<usize>) -> Vec<MountPoint> {
    let mut entries = Vec::new();
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(fsname), Some(dir), Some(_kind), Some(opts)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };

        match fsname {
            "tmpfs" => entries.push(MountPoint {
                path: PathBuf::from(dir),
                page_size,
            }),
            "hugetlbfs" => {
                let Some(page_size) = page_size_from_mount_opts(opts).or(default_huge) else {
                    continue;
                };
                entries.push(MountPoint {
                    path: PathBuf::from(dir),
                    page_size,
                });
            }
            _ => {}
        }
    }
    entries
}

/// Host mount-table scan, performed once per process.
fn host_mounts() -> &'static [MountPoint] {
    static MOUNTS: OnceLock<Vec<MountPoint>> = OnceLock::new();
    MOUNTS.get_or_init(|| {
        let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
            return Vec::new();
        };
        let default_huge = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|meminfo| parse_default_huge_page_size(&meminfo));
        parse_mounts(&mounts, rustix::param::page_size(), default_huge)
    })
}

fn find_by_page_size(mounts: &[MountPoint], page_size: usize) -> Option<&MountPoint> {
    mounts.iter().find(|entry| entry.page_size == page_size)
}

fn find_default(mounts: &[MountPoint]) -> Option<&MountPoint> {
    mounts
        .iter()
        .find(|entry| entry.path == Path::new("/dev/shm"))
        .or_else(|| mounts.iter().find(|entry| entry.path == Path::new("/tmp")))
}

/// Default memory source: a directory on a tmpfs or hugetlbfs mount.
#[derive(Debug, Clone)]
pub struct DefaultMemorySource {
    path: PathBuf,
    page_size: usize,
}

impl DefaultMemorySource {
    /// Regular-page source on `/dev/shm` (or `/tmp`).
    pub fn new() -> Result<Self> {
        Self::with_huge_pages(HugePagesOption::None)
    }

    /// Source selected by hugepage preference from the host mount table.
    pub fn with_huge_pages(option: HugePagesOption) -> Result<Self> {
        let mounts = host_mounts();
        let entry = match option {
            HugePagesOption::None => find_default(mounts),
            HugePagesOption::HugePages2M => find_by_page_size(mounts, PAGE_SIZE_2M),
            HugePagesOption::HugePages1G => find_by_page_size(mounts, PAGE_SIZE_1G),
            HugePagesOption::Auto => find_by_page_size(mounts, PAGE_SIZE_1G)
                .or_else(|| find_by_page_size(mounts, PAGE_SIZE_2M))
                .or_else(|| find_default(mounts)),
        };
        let entry = entry.ok_or(QueueError::NoMountPoint)?;
        Ok(Self {
            path: entry.path.clone(),
            page_size: entry.page_size,
        })
    }

    /// Explicit source: an existing directory plus the page size backing it.
    pub fn with_path(path: impl Into<PathBuf>, page_size: usize) -> Result<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(QueueError::InvalidOptions("directory does not exist"));
        }
        if !page_size.is_power_of_two() {
            return Err(QueueError::InvalidOptions("page size must be a power of two"));
        }
        Ok(Self { path, page_size })
    }

    /// Backing directory queue files are created in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page size allocations are rounded up to.
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl MemorySource for DefaultMemorySource {
    fn open(&self, name: &str, flags: OpenFlags) -> Result<(File, usize)> {
        let path = self.path.join(name);
        let file = match flags {
            OpenFlags::OpenOnly => File::open(&path)?,
            OpenFlags::OpenOrCreate => File::open_or_create(&path)?,
        };
        Ok((file, self.page_size))
    }
}

/// Memory source backed by anonymous memfds.
///
/// Every `open` call produces a fresh file regardless of `flags`; the name
/// only labels the descriptor in `/proc`. Queues are shared by sharing the
/// container (or its descriptor), not by name.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousMemorySource;

impl MemorySource for AnonymousMemorySource {
    fn open(&self, name: &str, _flags: OpenFlags) -> Result<(File, usize)> {
        let file = File::anonymous(name)?;
        Ok((file, rustix::param::page_size()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_from_mount_opts() {
        assert_eq!(page_size_from_mount_opts("rw,relatime,pagesize=2M"), Some(PAGE_SIZE_2M));
        assert_eq!(page_size_from_mount_opts("rw,pagesize=1G,mode=700"), Some(PAGE_SIZE_1G));
        assert_eq!(page_size_from_mount_opts("rw,pagesize=4K"), None);
        assert_eq!(page_size_from_mount_opts("rw,relatime"), None);
    }

    #[test]
    fn test_parse_default_huge_page_size() {
        let meminfo = "MemTotal:       16308792 kB\nHugepagesize:       2048 kB\n";
        assert_eq!(parse_default_huge_page_size(meminfo), Some(2048 * 1024));
        assert_eq!(parse_default_huge_page_size("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn test_parse_mounts() {
        let mounts = "\
sysfs /sys sysfs rw,nosuid 0 0
tmpfs /dev/shm tmpfs rw,nosuid,nodev 0 0
tmpfs /run tmpfs rw,mode=755 0 0
hugetlbfs /mnt/huge2m hugetlbfs rw,relatime,pagesize=2M 0 0
hugetlbfs /mnt/huge hugetlbfs rw,relatime 0 0
";
        let entries = parse_mounts(mounts, 4096, Some(PAGE_SIZE_2M));
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].path, Path::new("/dev/shm"));
        assert_eq!(entries[0].page_size, 4096);
        assert_eq!(entries[2].page_size, PAGE_SIZE_2M);
        // No pagesize option and no meminfo fallback: entry skipped.
        assert_eq!(parse_mounts(mounts, 4096, None).len(), 3);
    }

    #[test]
    fn test_with_path_validation() {
        assert!(DefaultMemorySource::with_path("/nonexistent-turboq", 4096).is_err());
        assert!(DefaultMemorySource::with_path(std::env::temp_dir(), 1000).is_err());
        let source = DefaultMemorySource::with_path(std::env::temp_dir(), 4096).unwrap();
        assert_eq!(source.page_size(), 4096);
    }

    #[test]
    fn test_anonymous_source_open() {
        let source = AnonymousMemorySource;
        let (file, page_size) = source.open("turboq-source-test", OpenFlags::OpenOnly).unwrap();
        assert!(page_size.is_power_of_two());
        assert_eq!(file.size().unwrap(), 0);
    }
}

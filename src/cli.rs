use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(
    name = "rs-salvage",
    version,
    about = "Forensic volume capture from a live rescue environment: discover, mount read-only, archive, chunk, ship"
)]
pub struct Args {
    /// Path to rs-salvage.toml (default: next to the binary, then /etc/rs-salvage.toml)
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Print the discovery plan with skip reasons; no mounts, no archiving
    #[clap(long)]
    pub list: bool,

    /// Plan and print all commands without executing them
    #[clap(long)]
    pub dry_run: bool,

    /// Override worker concurrency (must be positive)
    #[clap(short, long)]
    pub workers: Option<usize>,

    /// Comma-separated /dev paths to restrict the run to (e.g. /dev/sdb1,/dev/nvme0n1p2)
    #[clap(long, value_name = "DEV[,DEV...]")]
    pub only: Option<String>,

    /// Comma-separated device names to skip, no /dev/ prefix (e.g. sda,nvme0n1)
    #[clap(long, value_name = "DEV[,DEV...]")]
    pub exclude_dev: Option<String>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Reject invocations the rest of the program should never see.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(workers) = self.workers {
            if workers == 0 {
                return Err("--workers must be a positive integer".to_string());
            }
        }
        for device in self.only_devices() {
            if !device.starts_with("/dev/") {
                return Err(format!(
                    "--only expects /dev paths, got {device:?} (try /dev/sdb1)"
                ));
            }
        }
        for device in self.exclude_devices() {
            if device.contains('/') {
                return Err(format!(
                    "--exclude-dev expects bare device names, got {device:?} (try sda)"
                ));
            }
        }
        Ok(())
    }

    fn only_devices(&self) -> Vec<String> {
        split_list(self.only.as_deref())
    }

    pub fn exclude_devices(&self) -> Vec<String> {
        split_list(self.exclude_dev.as_deref())
    }

    pub fn only_set(&self) -> Option<BTreeSet<String>> {
        self.only
            .as_deref()
            .map(|_| self.only_devices().into_iter().collect())
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "rs-salvage",
            "--workers",
            "4",
            "--only",
            "/dev/sdb1, /dev/sdc1",
            "--exclude-dev",
            "sda,nvme0n1",
        ])
        .unwrap();
        args.validate().unwrap();
        assert_eq!(args.workers, Some(4));
        let only = args.only_set().unwrap();
        assert!(only.contains("/dev/sdb1"));
        assert!(only.contains("/dev/sdc1"));
        assert_eq!(args.exclude_devices(), vec!["sda", "nvme0n1"]);
    }

    #[test]
    fn zero_workers_is_invalid() {
        let args = Args::try_parse_from(["rs-salvage", "--workers", "0"]).unwrap();
        assert!(args.validate().is_err());
    }

    #[test]
    fn only_requires_dev_paths() {
        let args = Args::try_parse_from(["rs-salvage", "--only", "sdb1"]).unwrap();
        assert!(args.validate().is_err());
    }

    #[test]
    fn exclude_requires_bare_names() {
        let args = Args::try_parse_from(["rs-salvage", "--exclude-dev", "/dev/sda"]).unwrap();
        assert!(args.validate().is_err());
    }

    #[test]
    fn no_overrides_means_no_restriction() {
        let args = Args::try_parse_from(["rs-salvage", "--list"]).unwrap();
        args.validate().unwrap();
        assert!(args.only_set().is_none());
        assert!(args.exclude_devices().is_empty());
        assert!(args.list);
    }
}

//! Native package database queries.

use std::process::Stdio;

use regex::Regex;
use tokio::process::Command;

use crate::error::{PlugindError, Result};

/// Read-only view over the host's dpkg database.
#[derive(Debug, Clone, Default)]
pub struct PackageDb;

impl PackageDb {
    pub fn new() -> Self {
        Self
    }

    /// List installed package names belonging to `section`.
    pub async fn list_installed_packages(&self, section: &str) -> Result<Vec<String>> {
        let output = Command::new("dpkg-query")
            .arg("-W")
            .arg("-f=${binary:Package} ${Section}\n")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(PlugindError::Internal(format!(
                "dpkg-query exited with {}",
                output.status
            )));
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(parse_package_listing(&listing, section))
    }
}

/// Filter a `package section` listing down to the package names of one
/// section.
pub fn parse_package_listing(listing: &str, section: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            let (package, package_section) = line.split_once(' ')?;
            if package_section == section && !package.is_empty() {
                Some(package.to_string())
            } else {
                None
            }
        })
        .collect()
}

/// Extract `(namespace, name)` from a plugin package name of the form
/// `<prefix>-<name>-<namespace>`.
pub fn parse_package_name(prefix: &str, package: &str) -> Result<(String, String)> {
    let pattern = format!("^{}-([a-z0-9-]+)-([a-z0-9]+)$", regex::escape(prefix));
    let re = Regex::new(&pattern)
        .map_err(|e| PlugindError::Internal(format!("invalid package pattern: {e}")))?;

    let captures = re
        .captures(package)
        .ok_or_else(|| PlugindError::InvalidPackageName(package.to_string()))?;

    Ok((captures[2].to_string(), captures[1].to_string()))
}

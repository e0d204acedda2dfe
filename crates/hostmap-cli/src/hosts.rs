//! Host group sourcing from flags, config groups and host files

use std::path::Path;

use eyre::{Result, WrapErr};
use hostmap_exec::HostGroup;

use crate::config::Config;

/// Where the host list comes from
#[derive(Debug, Default, clap::Args)]
pub struct HostSelection {
    /// Comma-separated host addresses
    #[arg(long, value_delimiter = ',')]
    pub hosts: Vec<String>,

    /// Named group from the config file
    #[arg(short, long)]
    pub group: Option<String>,

    /// File with one host per line
    #[arg(long)]
    pub hosts_file: Option<std::path::PathBuf>,
}

impl HostSelection {
    /// Combine every source, in flag order: hosts, group, file
    ///
    /// # Errors
    /// Returns error if the group is unknown, the file is unreadable, or nothing was selected
    pub fn resolve(&self, config: &Config) -> Result<HostGroup> {
        let mut hosts: Vec<String> = self
            .hosts
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(name) = &self.group {
            hosts.extend(config.group(name)?.iter().cloned());
        }

        if let Some(path) = &self.hosts_file {
            hosts.extend(read_hosts_file(path)?);
        }

        if hosts.is_empty() {
            eyre::bail!("no hosts selected (use --hosts, --group or --hosts-file)");
        }

        Ok(HostGroup::new(hosts))
    }
}

/// Read a host file: blank lines and `#` comments are skipped
///
/// # Errors
/// Returns error if the file cannot be read
pub fn read_hosts_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read hosts file {}", path.display()))?;
    Ok(parse_hosts(&content))
}

fn parse_hosts(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hosts_skips_comments() {
        let hosts = parse_hosts("# fleet\nweb1\n\n  web2  # primary\n#db1\nweb1\n");
        assert_eq!(hosts, vec!["web1", "web2", "web1"]);
    }

    #[test]
    fn test_resolve_combines_sources() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hosts");
        std::fs::write(&file, "file1\nfile2\n").unwrap();

        let config: Config = toml::from_str("[groups]\nweb = [\"web1\"]\n").unwrap();
        let selection = HostSelection {
            hosts: vec!["a".into(), " ".into()],
            group: Some("web".into()),
            hosts_file: Some(file),
        };

        let group = selection.resolve(&config).unwrap();
        let hosts: Vec<&String> = group.iter().collect();
        assert_eq!(hosts, ["a", "web1", "file1", "file2"]);
    }

    #[test]
    fn test_resolve_requires_hosts() {
        let result = HostSelection::default().resolve(&Config::default());
        assert!(result.is_err());
    }
}

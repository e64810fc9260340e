//! Per-job on-disk layout: mount point, namespace holder file, bind-mount
//! source, and active-job marker, all derived from a job's basepath and id.

use std::path::PathBuf;

use crate::config::NamespaceConfig;

#[derive(Debug, Clone)]
pub struct JobPaths {
    pub job_mount: PathBuf,
    pub ns_holder: PathBuf,
    pub src_bind: PathBuf,
    pub active: PathBuf,
}

impl JobPaths {
    pub fn build(config: &NamespaceConfig, job_id: u32) -> Self {
        let job_mount = config.job_mount(job_id);
        JobPaths {
            ns_holder: job_mount.join(".ns"),
            src_bind: job_mount.join(format!(".{job_id}")),
            active: job_mount.join(".active"),
            job_mount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn builds_expected_layout() {
        let mut map = HashMap::new();
        map.insert("namespace.basepath".to_string(), "/var/ns".to_string());
        let config = NamespaceConfig::from_map(&map).unwrap();
        let paths = JobPaths::build(&config, 42);
        assert_eq!(paths.job_mount, std::path::PathBuf::from("/var/ns/42"));
        assert_eq!(paths.ns_holder, std::path::PathBuf::from("/var/ns/42/.ns"));
        assert_eq!(paths.src_bind, std::path::PathBuf::from("/var/ns/42/.42"));
        assert_eq!(paths.active, std::path::PathBuf::from("/var/ns/42/.active"));
    }
}

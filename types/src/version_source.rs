use serde::{Deserialize, Serialize};

/// One file in a version source's ordered file list (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub code: String,
}

/// Tagged union `Release(version, files[])` | `Branch(name, files[])`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VersionSource {
    Release { version: String, files: Vec<SourceFile> },
    Branch { name: String, files: Vec<SourceFile> },
}

impl VersionSource {
    pub fn files(&self) -> &[SourceFile] {
        match self {
            VersionSource::Release { files, .. } => files,
            VersionSource::Branch { files, .. } => files,
        }
    }

    /// The entry with `name == "main"`, or the first file if absent.
    pub fn entry_point(&self) -> Option<&SourceFile> {
        let files = self.files();
        files
            .iter()
            .find(|f| f.name == "main")
            .or_else(|| files.first())
    }

    pub fn label(&self) -> String {
        match self {
            VersionSource::Release { version, .. } => format!("release:{version}"),
            VersionSource::Branch { name, .. } => format!("debug:{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_point_prefers_main() {
        let vs = VersionSource::Release {
            version: "1".into(),
            files: vec![
                SourceFile { name: "util.js".into(), code: "".into() },
                SourceFile { name: "main".into(), code: "1+1".into() },
            ],
        };
        assert_eq!(vs.entry_point().unwrap().name, "main");
    }

    #[test]
    fn entry_point_falls_back_to_first() {
        let vs = VersionSource::Branch {
            name: "feature".into(),
            files: vec![SourceFile { name: "index.js".into(), code: "1".into() }],
        };
        assert_eq!(vs.entry_point().unwrap().name, "index.js");
    }
}

//! Catalog snapshots and their derivation from the source's group map.
//!
//! The catalog endpoint returns groups keyed by a numeric id rendered as a
//! string; each group carries a playlist URL and a list of channels. The
//! derived tree gives every group a directory with `<group>.xml` and
//! `<group>.m3u` playlists, and every channel a directory with
//! `<channel>.ts` (live stream) and `<channel>.strm` (URL descriptor).

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::catalog::node::NodeKind;

/// One channel inside a group, as served by the catalog endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    pub url: String,
}

/// One group, as served by the catalog endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub smfs: Vec<ChannelEntry>,
}

/// Group map as it appears on the wire, keyed by group id.
pub type GroupMap = BTreeMap<String, GroupEntry>;

/// One entry of a catalog snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub path: String,
    pub kind: NodeKind,
    pub url: Option<String>,
}

/// Full catalog description fetched from the source.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub entries: Vec<SnapshotEntry>,
}

impl CatalogSnapshot {
    pub fn directory(&mut self, path: impl Into<String>) {
        self.entries.push(SnapshotEntry {
            path: path.into(),
            kind: NodeKind::Directory,
            url: None,
        });
    }

    pub fn remote_file(&mut self, path: impl Into<String>, url: impl Into<String>) {
        self.entries.push(SnapshotEntry {
            path: path.into(),
            kind: NodeKind::RemoteFile,
            url: Some(url.into()),
        });
    }

    /// Derive the virtual tree from the source's group map.
    pub fn from_groups(groups: &GroupMap) -> Self {
        let mut snapshot = CatalogSnapshot::default();
        for group in groups.values() {
            let group_name = strip_display_prefix(&group.name);
            let group_dir = format!("/{group_name}");
            snapshot.directory(group_dir.clone());
            snapshot.remote_file(format!("{group_dir}/{group_name}.xml"), group.url.clone());
            snapshot.remote_file(format!("{group_dir}/{group_name}.m3u"), group.url.clone());
            for channel in &group.smfs {
                let channel_name = strip_display_prefix(&channel.name);
                let channel_dir = format!("{group_dir}/{channel_name}");
                snapshot.directory(channel_dir.clone());
                snapshot.remote_file(
                    format!("{channel_dir}/{channel_name}.ts"),
                    channel.url.clone(),
                );
                snapshot.remote_file(
                    format!("{channel_dir}/{channel_name}.strm"),
                    channel.url.clone(),
                );
            }
        }
        snapshot
    }
}

/// Strip the quality prefixes some sources prepend to display names.
pub fn strip_display_prefix(name: &str) -> &str {
    const PREFIXES: [&str; 3] = ["HD :", "VOD:", "SD :"];
    for prefix in PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            return rest.trim_start();
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_group() -> GroupMap {
        serde_json::from_str(
            r#"{"2":{"name":"A","url":"http://h/A","smfs":[{"name":"X","url":"http://h/X"}]}}"#,
        )
        .unwrap()
    }

    #[test]
    fn derives_group_and_channel_paths() {
        let snapshot = CatalogSnapshot::from_groups(&single_group());
        let paths: Vec<&str> = snapshot.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/A",
                "/A/A.xml",
                "/A/A.m3u",
                "/A/X",
                "/A/X/X.ts",
                "/A/X/X.strm",
            ]
        );
    }

    #[test]
    fn playlist_entries_carry_the_group_url_base() {
        let snapshot = CatalogSnapshot::from_groups(&single_group());
        let xml = snapshot
            .entries
            .iter()
            .find(|e| e.path == "/A/A.xml")
            .unwrap();
        // the .xml/.m3u extension is appended at fetch time, not here
        assert_eq!(xml.url.as_deref(), Some("http://h/A"));
    }

    #[test]
    fn channel_files_carry_the_channel_url() {
        let snapshot = CatalogSnapshot::from_groups(&single_group());
        for path in ["/A/X/X.ts", "/A/X/X.strm"] {
            let entry = snapshot.entries.iter().find(|e| e.path == path).unwrap();
            assert_eq!(entry.url.as_deref(), Some("http://h/X"));
        }
    }

    #[test]
    fn group_without_channels_still_gets_playlists() {
        let groups: GroupMap =
            serde_json::from_str(r#"{"7":{"name":"News","url":"http://h/news"}}"#).unwrap();
        let snapshot = CatalogSnapshot::from_groups(&groups);
        let paths: Vec<&str> = snapshot.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/News", "/News/News.xml", "/News/News.m3u"]);
    }

    #[test]
    fn display_prefixes_are_stripped() {
        assert_eq!(strip_display_prefix("HD :Sports One"), "Sports One");
        assert_eq!(strip_display_prefix("VOD:Movies"), "Movies");
        assert_eq!(strip_display_prefix("SD : Retro"), "Retro");
        assert_eq!(strip_display_prefix("Plain"), "Plain");
    }
}

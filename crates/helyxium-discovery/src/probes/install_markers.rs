//! Known install directories and application bundles

use async_trait::async_trait;
use helyxium_core::catalog;
use helyxium_core::{DetectionMethod, Evidence, PlatformId, ProbeError, ProbeId, ProbeReport};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::Probe;
use crate::context::{Os, ProbeContext};

/// Where a relative marker path is anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    ProgramFiles,
    Home,
    Absolute,
}

/// How to read a version once the marker is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VersionSource {
    None,
    /// `CoreData/Manifests/oculus-client.json`, field `version`
    OculusManifest,
    /// Plain text file relative to the install directory
    TextFile(&'static str),
    /// `Contents/Info.plist` of a macOS `.app`
    BundlePlist,
    /// `"version"` of the owning Steam client's package manifest
    SteamClient,
}

struct Marker {
    platform: PlatformId,
    os: Os,
    root: Root,
    path: &'static str,
    version: VersionSource,
    /// Directory under the install whose subdirectories are installed titles
    titles: Option<&'static str>,
}

const fn marker(platform: PlatformId, os: Os, root: Root, path: &'static str, version: VersionSource) -> Marker {
    Marker {
        platform,
        os,
        root,
        path,
        version,
        titles: None,
    }
}

impl Marker {
    const fn with_titles(self, dir: &'static str) -> Marker {
        Marker {
            titles: Some(dir),
            ..self
        }
    }
}

const MARKERS: &[Marker] = &[
    marker(PlatformId::OculusPc, Os::Windows, Root::ProgramFiles, "Oculus", VersionSource::OculusManifest)
        .with_titles("Software"),
    marker(PlatformId::Viveport, Os::Windows, Root::ProgramFiles, "VIVE/Viveport", VersionSource::TextFile("version.txt"))
        .with_titles("Games"),
    marker(PlatformId::Viveport, Os::Windows, Root::Absolute, "C:/Viveport", VersionSource::TextFile("version.txt"))
        .with_titles("Games"),
    marker(PlatformId::VarjoBase, Os::Windows, Root::ProgramFiles, "Varjo", VersionSource::TextFile("version.txt")),
    marker(PlatformId::PicoConnect, Os::Windows, Root::ProgramFiles, "Pico Interactive", VersionSource::None),
    marker(PlatformId::PicoConnect, Os::Windows, Root::ProgramFiles, "PicoConnect", VersionSource::None),
    marker(PlatformId::VrChat, Os::Windows, Root::ProgramFiles, "VRChat", VersionSource::None),
    marker(PlatformId::RecRoom, Os::Windows, Root::ProgramFiles, "Rec Room", VersionSource::None),
    marker(PlatformId::VrChat, Os::Macos, Root::Absolute, "/Applications/VRChat.app", VersionSource::BundlePlist),
    marker(PlatformId::VrChat, Os::Macos, Root::Home, "Applications/VRChat.app", VersionSource::BundlePlist),
];

/// Steam library roots; Flatpak and Snap sandbox their own copy on Linux
const STEAM_ROOTS: &[(Os, Root, &str)] = &[
    (Os::Windows, Root::ProgramFiles, "Steam"),
    (Os::Linux, Root::Home, ".steam/steam"),
    (Os::Linux, Root::Home, ".local/share/Steam"),
    (Os::Linux, Root::Home, ".var/app/com.valvesoftware.Steam/.local/share/Steam"),
    (Os::Linux, Root::Home, "snap/steam/common/.local/share/Steam"),
    (Os::Macos, Root::Home, "Library/Application Support/Steam"),
];

/// Client package manifest carrying the Steam client version
const STEAM_CLIENT_MANIFESTS: &[(Os, &str)] = &[
    (Os::Windows, "steam_client_win32.manifest"),
    (Os::Linux, "steam_client_ubuntu12.manifest"),
    (Os::Macos, "steam_client_osx.manifest"),
];

/// Platforms distributed as Steam apps, by `steamapps/common` directory
const STEAM_APPS: &[(PlatformId, &str)] = &[
    (PlatformId::SteamVr, "SteamVR"),
    (PlatformId::VrChat, "VRChat"),
    (PlatformId::RecRoom, "Rec Room"),
];

/// One Steam library folder and the client install that lists it
#[derive(Debug, Clone, PartialEq, Eq)]
struct SteamLibrary {
    client: PathBuf,
    path: PathBuf,
}

/// A concrete path to check on this host
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    platform: PlatformId,
    path: PathBuf,
    version: VersionSource,
    titles: Option<&'static str>,
    /// Package manifest of the Steam client, for Steam apps
    client_manifest: Option<PathBuf>,
}

pub struct InstallMarkersProbe;

#[async_trait]
impl Probe for InstallMarkersProbe {
    fn id(&self) -> ProbeId {
        ProbeId::InstallMarkers
    }

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport {
        let libraries = steam_libraries(ctx).await;
        let candidates = candidates(ctx, &libraries);
        if candidates.is_empty() {
            return ProbeReport::failed(ProbeError::Unavailable(format!(
                "no install roots known for {}",
                ctx.os
            )));
        }

        let mut findings = Vec::new();
        let mut failures = Vec::new();

        for candidate in &candidates {
            match tokio::fs::metadata(&candidate.path).await {
                Ok(meta) if meta.is_dir() => {
                    debug!(platform = %candidate.platform, path = %candidate.path.display(), "Install marker found");
                    findings.push(Evidence::PlatformInstall {
                        platform: candidate.platform,
                        install_path: Some(candidate.path.clone()),
                        version: read_version(candidate).await,
                        method: DetectionMethod::Filesystem,
                    });
                    if let Some(dir) = candidate.titles {
                        let titles = subdirectories(&candidate.path.join(dir), |_| true).await;
                        if !titles.is_empty() {
                            findings.push(Evidence::PlatformTitles {
                                platform: candidate.platform,
                                titles,
                            });
                        }
                    }
                }
                Ok(_) => trace!(path = %candidate.path.display(), "Marker is not a directory"),
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    failures.push(ProbeError::PermissionDenied(candidate.path.display().to_string()));
                }
                Err(_) => {}
            }
        }

        let mut steam_titles = Vec::new();
        for library in &libraries {
            let common = library.path.join("steamapps").join("common");
            steam_titles.extend(subdirectories(&common, catalog::is_known_vr_title).await);
        }
        if !steam_titles.is_empty() {
            findings.push(Evidence::PlatformTitles {
                platform: PlatformId::SteamVr,
                titles: steam_titles,
            });
        }

        ProbeReport::from_attempts(findings, candidates.len(), failures)
    }
}

/// Steam client roots for this OS plus every library folder they list
async fn steam_libraries(ctx: &ProbeContext) -> Vec<SteamLibrary> {
    let mut libraries: Vec<SteamLibrary> = Vec::new();

    for (_, root, path) in STEAM_ROOTS.iter().filter(|(os, _, _)| *os == ctx.os) {
        for client in anchor(ctx, *root, path) {
            let mut paths = vec![client.clone()];
            for listing in [
                client.join("steamapps").join("libraryfolders.vdf"),
                client.join("config").join("libraryfolders.vdf"),
            ] {
                if let Ok(text) = tokio::fs::read_to_string(&listing).await {
                    let listed = library_paths(&text);
                    debug!(listing = %listing.display(), libraries = listed.len(), "Read Steam library folders");
                    paths.extend(listed);
                }
            }

            for path in paths {
                if !libraries.iter().any(|l| l.path == path) {
                    libraries.push(SteamLibrary {
                        client: client.clone(),
                        path,
                    });
                }
            }
        }
    }

    libraries
}

fn candidates(ctx: &ProbeContext, libraries: &[SteamLibrary]) -> Vec<Candidate> {
    let mut out = Vec::new();
    let manifest = STEAM_CLIENT_MANIFESTS
        .iter()
        .find(|(os, _)| *os == ctx.os)
        .map(|(_, name)| *name);

    for library in libraries {
        for (platform, app) in STEAM_APPS {
            let steamvr = *platform == PlatformId::SteamVr;
            out.push(Candidate {
                platform: *platform,
                path: library.path.join("steamapps").join("common").join(app),
                version: if steamvr { VersionSource::SteamClient } else { VersionSource::None },
                titles: None,
                client_manifest: manifest
                    .filter(|_| steamvr)
                    .map(|name| library.client.join("package").join(name)),
            });
        }
    }

    for m in MARKERS.iter().filter(|m| m.os == ctx.os) {
        for path in anchor(ctx, m.root, m.path) {
            out.push(Candidate {
                platform: m.platform,
                path,
                version: m.version,
                titles: m.titles,
                client_manifest: None,
            });
        }
    }

    out.dedup();
    out
}

/// Sorted names of the subdirectories of `dir` accepted by `keep`
async fn subdirectories(dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if keep(&name) {
            names.push(name);
        }
    }
    names.sort();
    names
}

/// Resolve a relative marker against every matching root of the context
fn anchor(ctx: &ProbeContext, root: Root, relative: &str) -> Vec<PathBuf> {
    let bases: Vec<PathBuf> = match root {
        Root::ProgramFiles => ctx.program_files.clone(),
        Root::Home => ctx.home.iter().cloned().collect(),
        Root::Absolute => vec![PathBuf::new()],
    };

    bases
        .into_iter()
        .map(|mut base| {
            for (i, part) in relative.split('/').enumerate() {
                if i == 0 && part.is_empty() {
                    base.push("/");
                } else if !part.is_empty() {
                    base.push(part);
                }
            }
            base
        })
        .collect()
}

async fn read_version(candidate: &Candidate) -> Option<String> {
    let install = candidate.path.as_path();
    match candidate.version {
        VersionSource::None => None,
        VersionSource::OculusManifest => {
            let manifest = install.join("CoreData").join("Manifests").join("oculus-client.json");
            let text = tokio::fs::read_to_string(manifest).await.ok()?;
            oculus_manifest_version(&text)
        }
        VersionSource::TextFile(name) => {
            let text = tokio::fs::read_to_string(install.join(name)).await.ok()?;
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        VersionSource::BundlePlist => {
            let plist = tokio::fs::read_to_string(install.join("Contents").join("Info.plist"))
                .await
                .ok()?;
            bundle_version(&plist)
        }
        VersionSource::SteamClient => {
            let manifest = tokio::fs::read_to_string(candidate.client_manifest.as_ref()?)
                .await
                .ok()?;
            let version =
                vdf_pairs(&manifest).find_map(|(key, value)| (key == "version").then_some(value));
            version
        }
    }
}

/// Quoted tokens of one line of a Valve KeyValues (`.vdf`) file
fn vdf_tokens(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                let mut token = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some('n') => token.push('\n'),
                            Some('t') => token.push('\t'),
                            Some(escaped) => token.push(escaped),
                            None => break,
                        },
                        '"' => break,
                        c => token.push(c),
                    }
                }
                tokens.push(token);
            }
            '/' if chars.as_str().starts_with('/') => break,
            _ => {}
        }
    }
    tokens
}

/// `"key" "value"` lines of a KeyValues file, ignoring nesting
fn vdf_pairs(text: &str) -> impl Iterator<Item = (String, String)> + '_ {
    text.lines().filter_map(|line| {
        let mut tokens = vdf_tokens(line).into_iter();
        Some((tokens.next()?, tokens.next()?))
    })
}

/// Library folders listed in `libraryfolders.vdf`.
///
/// Current clients nest a `"path"` under each numbered entry; older ones
/// mapped the number straight to the path.
pub fn library_paths(vdf: &str) -> Vec<PathBuf> {
    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    vdf_pairs(vdf)
        .filter(|(key, value)| {
            // Numeric pairs under `"apps"` map app IDs to sizes
            !value.is_empty() && (key == "path" || (numeric(key) && !numeric(value)))
        })
        .map(|(_, value)| PathBuf::from(value))
        .collect()
}

pub fn oculus_manifest_version(manifest: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(manifest).ok()?;
    value.get("version")?.as_str().map(str::to_string)
}

/// `CFBundleShortVersionString` from an XML property list
pub fn bundle_version(plist: &str) -> Option<String> {
    let mut reader = Reader::from_str(plist);
    let mut element: Option<Vec<u8>> = None;
    let mut last_key: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => element = Some(e.name().as_ref().to_vec()),
            Ok(Event::End(_)) => element = None,
            Ok(Event::Text(t)) => {
                let text = t.unescape().ok()?;
                let text = text.trim();
                match element.as_deref() {
                    Some(b"key") => last_key = Some(text.to_string()),
                    Some(b"string") if last_key.as_deref() == Some("CFBundleShortVersionString") => {
                        return Some(text.to_string());
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helyxium_core::ProbeOutcome;
    use std::time::Duration;

    #[tokio::test]
    async fn test_flatpak_steamvr_found() {
        let home = tempfile::tempdir().unwrap();
        let steamvr = home
            .path()
            .join(".var/app/com.valvesoftware.Steam/.local/share/Steam/steamapps/common/SteamVR");
        std::fs::create_dir_all(&steamvr).unwrap();

        let mut ctx = ProbeContext::bare(Os::Linux, Duration::from_secs(1));
        ctx.home = Some(home.path().to_path_buf());

        let report = InstallMarkersProbe.run(&ctx).await;
        assert_eq!(report.outcome, ProbeOutcome::Success);
        assert_eq!(
            report.findings,
            vec![Evidence::PlatformInstall {
                platform: PlatformId::SteamVr,
                install_path: Some(steamvr),
                version: None,
                method: DetectionMethod::Filesystem,
            }]
        );
    }

    #[tokio::test]
    async fn test_oculus_version_from_manifest() {
        let program_files = tempfile::tempdir().unwrap();
        let manifests = program_files.path().join("Oculus/CoreData/Manifests");
        std::fs::create_dir_all(&manifests).unwrap();
        std::fs::write(
            manifests.join("oculus-client.json"),
            r#"{"canonicalName":"oculus-client","version":"66.0.0.312.358"}"#,
        )
        .unwrap();

        let mut ctx = ProbeContext::bare(Os::Windows, Duration::from_secs(1));
        ctx.program_files = vec![program_files.path().to_path_buf()];

        let report = InstallMarkersProbe.run(&ctx).await;
        let oculus = report
            .findings
            .iter()
            .find(|e| matches!(e, Evidence::PlatformInstall { platform: PlatformId::OculusPc, .. }))
            .unwrap();
        assert!(matches!(
            oculus,
            Evidence::PlatformInstall { version: Some(v), .. } if v == "66.0.0.312.358"
        ));
    }

    #[tokio::test]
    async fn test_no_roots_is_unavailable() {
        let ctx = ProbeContext::bare(Os::Linux, Duration::from_secs(1));
        let report = InstallMarkersProbe.run(&ctx).await;
        assert!(matches!(report.outcome, ProbeOutcome::Unavailable(_)));
    }

    #[test]
    fn test_anchor_absolute_and_relative() {
        let mut ctx = ProbeContext::bare(Os::Macos, Duration::from_secs(1));
        ctx.home = Some(PathBuf::from("/Users/ada"));
        assert_eq!(
            anchor(&ctx, Root::Absolute, "/Applications/VRChat.app"),
            vec![PathBuf::from("/Applications/VRChat.app")]
        );
        assert_eq!(
            anchor(&ctx, Root::Home, "Library/Application Support/Steam"),
            vec![PathBuf::from("/Users/ada/Library/Application Support/Steam")]
        );
        assert!(anchor(&ctx, Root::ProgramFiles, "Oculus").is_empty());
    }

    #[tokio::test]
    async fn test_secondary_steam_library() {
        let home = tempfile::tempdir().unwrap();
        let library = tempfile::tempdir().unwrap();
        let client = home.path().join(".local/share/Steam");
        std::fs::create_dir_all(client.join("steamapps")).unwrap();
        std::fs::create_dir_all(client.join("package")).unwrap();
        std::fs::write(
            client.join("steamapps/libraryfolders.vdf"),
            format!(
                "\"libraryfolders\"\n{{\n\t\"0\"\n\t{{\n\t\t\"path\"\t\t\"{}\"\n\t\t\"apps\"\n\t\t{{\n\t\t\t\"228980\"\t\t\"123456\"\n\t\t}}\n\t}}\n\t\"1\"\n\t{{\n\t\t\"path\"\t\t\"{}\"\n\t}}\n}}\n",
                client.display(),
                library.path().display()
            ),
        )
        .unwrap();
        std::fs::write(
            client.join("package/steam_client_ubuntu12.manifest"),
            "\"ubuntu12\"\n{\n\t\"version\"\t\t\"1712345678\"\n}\n",
        )
        .unwrap();

        let common = library.path().join("steamapps/common");
        for app in ["SteamVR", "Beat Saber", "Half-Life Alyx", "Counter-Strike Global Offensive"] {
            std::fs::create_dir_all(common.join(app)).unwrap();
        }

        let mut ctx = ProbeContext::bare(Os::Linux, Duration::from_secs(1));
        ctx.home = Some(home.path().to_path_buf());

        let report = InstallMarkersProbe.run(&ctx).await;
        assert_eq!(report.outcome, ProbeOutcome::Success);
        assert!(report.findings.contains(&Evidence::PlatformInstall {
            platform: PlatformId::SteamVr,
            install_path: Some(common.join("SteamVR")),
            version: Some("1712345678".to_string()),
            method: DetectionMethod::Filesystem,
        }));
        assert!(report.findings.contains(&Evidence::PlatformTitles {
            platform: PlatformId::SteamVr,
            titles: vec!["Beat Saber".to_string(), "Half-Life Alyx".to_string()],
        }));
    }

    #[test]
    fn test_library_paths_current_and_legacy() {
        let current = r#""libraryfolders"
{
	"0"
	{
		"path"		"C:\\Program Files (x86)\\Steam"
		"apps"
		{
			"250820"		"5405939254"
		}
	}
	"1"
	{
		"path"		"D:\\SteamLibrary"
	}
}"#;
        assert_eq!(
            library_paths(current),
            vec![
                PathBuf::from(r"C:\Program Files (x86)\Steam"),
                PathBuf::from(r"D:\SteamLibrary"),
            ]
        );

        let legacy = r#""LibraryFolders"
{
	"TimeNextStatsReport"		"1561832478"
	"ContentStatsID"		"-158337411110787451"
	"1"		"E:\\Games\\Steam" // second drive
}"#;
        assert_eq!(library_paths(legacy), vec![PathBuf::from(r"E:\Games\Steam")]);
    }

    #[tokio::test]
    async fn test_oculus_titles_and_varjo_version() {
        let program_files = tempfile::tempdir().unwrap();
        let software = program_files.path().join("Oculus/Software");
        for app in ["meta-horizon-worlds", "beat-games-beat-saber"] {
            std::fs::create_dir_all(software.join(app)).unwrap();
        }
        std::fs::write(software.join("library.json"), "{}").unwrap();
        let varjo = program_files.path().join("Varjo");
        std::fs::create_dir_all(&varjo).unwrap();
        std::fs::write(varjo.join("version.txt"), "4.3.0.12\n").unwrap();

        let mut ctx = ProbeContext::bare(Os::Windows, Duration::from_secs(1));
        ctx.program_files = vec![program_files.path().to_path_buf()];

        let report = InstallMarkersProbe.run(&ctx).await;
        assert!(report.findings.contains(&Evidence::PlatformTitles {
            platform: PlatformId::OculusPc,
            titles: vec!["beat-games-beat-saber".to_string(), "meta-horizon-worlds".to_string()],
        }));
        assert!(report.findings.contains(&Evidence::PlatformInstall {
            platform: PlatformId::VarjoBase,
            install_path: Some(varjo),
            version: Some("4.3.0.12".to_string()),
            method: DetectionMethod::Filesystem,
        }));
    }

    #[test]
    fn test_bundle_version() {
        let plist = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CFBundleName</key>
    <string>VRChat</string>
    <key>LSRequiresNativeExecution</key>
    <true/>
    <key>CFBundleShortVersionString</key>
    <string>2024.3.1</string>
</dict>
</plist>"#;
        assert_eq!(bundle_version(plist), Some("2024.3.1".to_string()));
        assert_eq!(bundle_version("<plist><dict></dict></plist>"), None);
    }
}

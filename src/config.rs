//! Hierarchical configuration of the X-Sendfile filter.
//!
//! Settings can be made at server scope, per filesystem directory and per URI location. Each
//! setting is a [`TriFlag`], and more specific scopes override less specific ones only where
//! they are not [`TriFlag::Unset`]. The merged tree is built once and only read afterwards.

use log::trace;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::context::RequestContext;
use crate::error::ConfigError;

/// A configuration flag that may be left unset to inherit the parent scope's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriFlag {
    /// Not configured in this scope.
    #[default]
    Unset,
    /// Explicitly `On`.
    Enabled,
    /// Explicitly `Off`.
    Disabled,
}

impl TriFlag {
    /// Merges a child scope over its parent: the child wins unless it is unset.
    pub fn merge(parent: TriFlag, child: TriFlag) -> TriFlag {
        if child != TriFlag::Unset {
            child
        } else {
            parent
        }
    }

    /// Resolves the flag to a boolean, using `default` if it is unset.
    pub fn is_enabled_or(self, default: bool) -> bool {
        match self {
            TriFlag::Unset => default,
            TriFlag::Enabled => true,
            TriFlag::Disabled => false,
        }
    }
}

impl From<bool> for TriFlag {
    fn from(value: bool) -> Self {
        if value {
            TriFlag::Enabled
        } else {
            TriFlag::Disabled
        }
    }
}

impl FromStr for TriFlag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("on") || s.eq_ignore_ascii_case("true") {
            Ok(TriFlag::Enabled)
        } else if s.eq_ignore_ascii_case("off") || s.eq_ignore_ascii_case("false") {
            Ok(TriFlag::Disabled)
        } else {
            Err(())
        }
    }
}

struct TriFlagVisitor;

impl<'de> Visitor<'de> for TriFlagVisitor {
    type Value = TriFlag;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a boolean or one of On, Off")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<TriFlag, E> {
        Ok(value.into())
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<TriFlag, E> {
        value
            .parse()
            .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
    }

    fn visit_unit<E: de::Error>(self) -> Result<TriFlag, E> {
        Ok(TriFlag::Unset)
    }

    fn visit_none<E: de::Error>(self) -> Result<TriFlag, E> {
        Ok(TriFlag::Unset)
    }
}

impl<'de> Deserialize<'de> for TriFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TriFlagVisitor)
    }
}

/// Settings of a single configuration scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    /// `XSendFile On|Off`: whether the filter processes responses at all.
    pub xsendfile: TriFlag,
    /// `XSendFileAllowAbove On|Off`: whether substituted files may lie outside the directory
    /// of the request.
    pub xsendfile_allow_above: TriFlag,
    /// `EnableSendfile On|Off`: whether file bodies may be handed to the kernel for sending.
    pub enable_sendfile: TriFlag,
    /// `EnableMMAP On|Off`: whether file bodies may be memory-mapped for sending.
    pub enable_mmap: TriFlag,
}

impl DirectoryConfig {
    /// Merges `child` over `self`, flag by flag.
    pub fn merge(&self, child: &DirectoryConfig) -> DirectoryConfig {
        DirectoryConfig {
            xsendfile: TriFlag::merge(self.xsendfile, child.xsendfile),
            xsendfile_allow_above: TriFlag::merge(
                self.xsendfile_allow_above,
                child.xsendfile_allow_above,
            ),
            enable_sendfile: TriFlag::merge(self.enable_sendfile, child.enable_sendfile),
            enable_mmap: TriFlag::merge(self.enable_mmap, child.enable_mmap),
        }
    }

    /// Applies a directive like `XSendFile On`. Directive names and values are
    /// case-insensitive.
    pub fn apply_directive(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let flag = if name.eq_ignore_ascii_case("xsendfile") {
            &mut self.xsendfile
        } else if name.eq_ignore_ascii_case("xsendfileallowabove") {
            &mut self.xsendfile_allow_above
        } else if name.eq_ignore_ascii_case("enablesendfile") {
            &mut self.enable_sendfile
        } else if name.eq_ignore_ascii_case("enablemmap") {
            &mut self.enable_mmap
        } else {
            return Err(ConfigError::UnknownDirective(name.to_owned()));
        };

        *flag = match value.parse() {
            Ok(TriFlag::Unset) | Err(()) => {
                return Err(ConfigError::InvalidFlag {
                    directive: name.to_owned(),
                    value: value.to_owned(),
                })
            }
            Ok(parsed) => parsed,
        };
        Ok(())
    }

    /// Applies a directive line such as `XSendFileAllowAbove off`.
    pub fn apply_line(&mut self, line: &str) -> Result<(), ConfigError> {
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let value = words.next().unwrap_or_default();
        if words.next().is_some() {
            return Err(ConfigError::InvalidFlag {
                directive: name.to_owned(),
                value: line.to_owned(),
            });
        }
        self.apply_directive(name, value)
    }
}

/// Configuration file contents: server scope settings at the top level, plus settings for
/// directories and URI locations.
///
/// ```yaml
/// xsendfile: on
/// directories:
///   /srv/app/private:
///     xsendfile: off
/// locations:
///   /downloads:
///     xsendfile_allow_above: on
/// ```
///
/// Unknown keys are rejected, at the top level as well as within a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawConf")]
pub struct XSendFileConf {
    /// Server scope settings.
    pub server: DirectoryConfig,
    /// Settings by filesystem directory.
    pub directories: BTreeMap<PathBuf, DirectoryConfig>,
    /// Settings by URI path prefix.
    pub locations: BTreeMap<String, DirectoryConfig>,
}

// `deny_unknown_fields` doesn't combine with `flatten`, so the server scope is spelled out.
#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConf {
    xsendfile: TriFlag,
    xsendfile_allow_above: TriFlag,
    enable_sendfile: TriFlag,
    enable_mmap: TriFlag,
    directories: BTreeMap<PathBuf, DirectoryConfig>,
    locations: BTreeMap<String, DirectoryConfig>,
}

impl From<RawConf> for XSendFileConf {
    fn from(raw: RawConf) -> Self {
        Self {
            server: DirectoryConfig {
                xsendfile: raw.xsendfile,
                xsendfile_allow_above: raw.xsendfile_allow_above,
                enable_sendfile: raw.enable_sendfile,
                enable_mmap: raw.enable_mmap,
            },
            directories: raw.directories,
            locations: raw.locations,
        }
    }
}

impl XSendFileConf {
    /// Loads configuration from a YAML file.
    pub fn load_from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let conf: Self = serde_yaml::from_reader(reader)?;
        trace!("Loaded configuration file: {conf:#?}");
        Ok(conf)
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Settings in effect for a single request, with defaults applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveConfig {
    /// The filter participates in this request.
    pub enabled: bool,
    /// Substituted files may be outside the request's directory.
    pub allow_escape: bool,
    /// Kernel-assisted transmission may be used.
    pub sendfile: bool,
    /// Memory-mapped transmission may be used.
    pub mmap: bool,
}

impl From<DirectoryConfig> for EffectiveConfig {
    fn from(conf: DirectoryConfig) -> Self {
        Self {
            enabled: conf.xsendfile.is_enabled_or(false),
            allow_escape: conf.xsendfile_allow_above.is_enabled_or(false),
            sendfile: conf.enable_sendfile.is_enabled_or(false),
            mmap: conf.enable_mmap.is_enabled_or(true),
        }
    }
}

fn location_matches(location: &str, uri: &str) -> bool {
    match uri.strip_prefix(location) {
        Some(rest) => location.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Immutable, pre-merged configuration tree.
///
/// Every directory node is merged with the server scope and all of its ancestor directories,
/// every location node with its ancestor locations. Looking up a request therefore only needs
/// to find the most specific node of each kind.
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    server: DirectoryConfig,
    /// Most specific directory first.
    directories: Vec<(PathBuf, DirectoryConfig)>,
    /// Longest location first.
    locations: Vec<(String, DirectoryConfig)>,
}

impl ConfigTree {
    /// Builds the tree from configuration file contents.
    pub fn new(conf: XSendFileConf) -> Self {
        let server = conf.server;

        let mut by_depth: Vec<_> = conf.directories.into_iter().collect();
        by_depth.sort_by_key(|(path, _)| path.components().count());
        let mut directories: Vec<_> = by_depth
            .iter()
            .map(|(path, _)| {
                let merged = by_depth
                    .iter()
                    .filter(|(ancestor, _)| path.starts_with(ancestor))
                    .fold(server, |merged, (_, child)| merged.merge(child));
                (path.clone(), merged)
            })
            .collect();
        directories.reverse();

        let mut by_length: Vec<_> = conf.locations.into_iter().collect();
        by_length.sort_by_key(|(location, _)| location.len());
        let mut locations: Vec<_> = by_length
            .iter()
            .map(|(location, _)| {
                let merged = by_length
                    .iter()
                    .filter(|(ancestor, _)| location_matches(ancestor, location))
                    .fold(DirectoryConfig::default(), |merged, (_, child)| {
                        merged.merge(child)
                    });
                (location.clone(), merged)
            })
            .collect();
        locations.reverse();

        Self {
            server,
            directories,
            locations,
        }
    }

    /// Finds the merged settings for a filesystem path and a URI path. Either may be absent;
    /// location settings take precedence over directory settings.
    pub fn lookup(&self, filename: Option<&Path>, uri: &str) -> DirectoryConfig {
        let dir = filename
            .and_then(|filename| {
                self.directories
                    .iter()
                    .find(|(path, _)| filename.starts_with(path))
            })
            .map_or(self.server, |(_, conf)| *conf);

        match self
            .locations
            .iter()
            .find(|(location, _)| location_matches(location, uri))
        {
            Some((_, location)) => dir.merge(location),
            None => dir,
        }
    }

    /// Settings in effect for the given request.
    pub fn resolve(&self, ctx: &RequestContext) -> EffectiveConfig {
        self.lookup(ctx.filename.as_deref(), &ctx.uri).into()
    }
}

impl From<XSendFileConf> for ConfigTree {
    fn from(conf: XSendFileConf) -> Self {
        Self::new(conf)
    }
}

use crate::archive::{Archive, ArchiveEntry, EntryFilter};
use crate::errors::Error;
use crate::manifest::{attribute_names, Manifest};
use crate::url::ResourceUrl;
use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Where the classpath index sidecar lives when the manifest does not point
/// elsewhere.
pub const DEFAULT_CLASSPATH_INDEX_LOCATION: &str = "classpath.idx";

/// The optional sidecar listing inner-archive entry names in the order they
/// should appear on the classpath. One YAML-list line per entry:
/// `- "lib/foo.jar"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassPathIndexFile {
    names: Vec<String>,
}

impl ClassPathIndexFile {
    pub fn parse(mut reader: impl Read) -> Result<ClassPathIndexFile, Error> {
        let mut text = String::new();
        reader.read_to_string(&mut text).map_err(Error::io)?;
        let mut names = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let name = line
                .strip_prefix("- \"")
                .and_then(|rest| rest.strip_suffix('"'))
                .ok_or_else(|| Error::malformed("classpath index line"))?;
            names.push(name.to_owned());
        }
        Ok(ClassPathIndexFile { names })
    }

    /// Load the index named by the manifest's classpath-index attribute, or
    /// from the default location. `None` when the archive carries no index.
    pub fn load_from(archive: &Archive) -> Result<Option<ClassPathIndexFile>, Error> {
        let location = archive
            .manifest()?
            .and_then(|manifest| {
                manifest
                    .main_attributes()
                    .value(attribute_names::CLASSPATH_INDEX)
                    .map(ToOwned::to_owned)
            })
            .unwrap_or_else(|| DEFAULT_CLASSPATH_INDEX_LOCATION.to_owned());
        match archive.input_stream(&location)? {
            Some(reader) => Ok(Some(ClassPathIndexFile::parse(reader)?)),
            None => Ok(None),
        }
    }

    pub fn contains_entry(&self, name: &str) -> bool {
        self.names.iter().any(|candidate| candidate == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One ordered classpath location.
pub struct ClassPathEntry {
    archive: Archive,
    url: ResourceUrl,
    ordinal: usize,
}

impl ClassPathEntry {
    pub fn url(&self) -> &ResourceUrl {
        &self.url
    }

    /// Position assigned at construction; stable for the resolver lifetime.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    fn resource_url(&self, name: &str) -> Option<ResourceUrl> {
        match self.archive.contains_entry(name) {
            Ok(true) => self.entry_url(name),
            Ok(false) => None,
            Err(error) => {
                warn!(%error, ordinal = self.ordinal, "skipping unusable classpath entry");
                None
            }
        }
    }

    fn entry_url(&self, name: &str) -> Option<ResourceUrl> {
        match &self.url {
            ResourceUrl::Archive(url) => Some(ResourceUrl::Archive(url.join_entry(name))),
            ResourceUrl::File(url) => url.join(name).ok().map(ResourceUrl::File),
        }
    }
}

/// Attributes a runtime needs to define the package of a class, recovered
/// from the manifest of the enclosing archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDefinition {
    name: String,
    implementation_title: Option<String>,
    implementation_version: Option<String>,
    sealed: bool,
}

impl PackageDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn implementation_title(&self) -> Option<&str> {
        self.implementation_title.as_deref()
    }

    pub fn implementation_version(&self) -> Option<&str> {
        self.implementation_version.as_deref()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

/// An ordered list of classpath entries with first-match and all-matches
/// resource lookup.
///
/// Missing-resource probes are the dominant operation, so a miss is a plain
/// `None` with nothing allocated and no error machinery involved.
#[derive(Default)]
pub struct ClassPathResolver {
    entries: Vec<ClassPathEntry>,
    packages: Mutex<HashMap<String, Arc<PackageDefinition>>>,
}

impl ClassPathResolver {
    pub fn new() -> ClassPathResolver {
        ClassPathResolver::default()
    }

    /// Append an archive (or exploded directory) as the next classpath
    /// entry.
    pub fn push(&mut self, archive: Archive) -> Result<(), Error> {
        let url = archive.url()?;
        let ordinal = self.entries.len();
        self.entries.push(ClassPathEntry {
            archive,
            url,
            ordinal,
        });
        Ok(())
    }

    /// Build a resolver from the nested archives of an outer archive that
    /// match both filters.
    ///
    /// Non-exploded layouts keep central directory order. Exploded layouts
    /// follow the classpath index when one is present: unindexed directory
    /// roots first (the classes root precedes library roots), indexed
    /// entries in listed order, and unindexed leftovers appended in
    /// discovery order.
    pub fn assemble(
        archive: &Archive,
        search_filter: Option<EntryFilter<'_>>,
        include_filter: Option<EntryFilter<'_>>,
    ) -> Result<ClassPathResolver, Error> {
        let mut resolver = ClassPathResolver::new();
        let index_file = ClassPathIndexFile::load_from(archive)?;
        if archive.is_exploded() {
            if let Some(index_file) = &index_file {
                let matching = matching_entries(archive, search_filter, include_filter)?;
                for entry in ordered_by_index(matching, index_file) {
                    resolver.push(archive.nested_archive(&entry)?)?;
                }
                debug!(entries = resolver.len(), "assembled indexed classpath");
                return Ok(resolver);
            }
        }
        for child in archive.nested_archives(search_filter, include_filter)? {
            resolver.push(child?)?;
        }
        debug!(entries = resolver.len(), "assembled classpath");
        Ok(resolver)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ClassPathEntry] {
        &self.entries
    }

    /// The first classpath entry containing `name`, in declared order. The
    /// empty name addresses the first classpath root.
    pub fn find_resource(&self, name: &str) -> Option<ResourceUrl> {
        if name.is_empty() {
            return self.entries.first().map(|entry| entry.url.clone());
        }
        self.entries
            .iter()
            .find_map(|entry| entry.resource_url(name))
    }

    /// Every classpath entry containing `name`, in declared order, duplicate
    /// names across entries included. The empty name yields one URL per
    /// classpath root.
    pub fn find_resources(&self, name: &str) -> Vec<ResourceUrl> {
        if name.is_empty() {
            return self.entries.iter().map(|entry| entry.url.clone()).collect();
        }
        self.entries
            .iter()
            .filter_map(|entry| entry.resource_url(name))
            .collect()
    }

    /// Read the bytes of the class `a.b.C` from the first entry carrying
    /// `a/b/C.class`.
    pub fn load_class_bytes(&self, binary_name: &str) -> Result<Option<Vec<u8>>, Error> {
        let resource = class_resource_name(binary_name);
        for entry in &self.entries {
            if let Some(mut reader) = entry.archive.input_stream(&resource)? {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes).map_err(Error::io)?;
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    /// Package attributes for a class about to be defined, taken from the
    /// manifest of the first enclosing archive that has one.
    ///
    /// Definitions are memoised idempotently: racing callers all observe the
    /// definition of the first winner.
    pub fn define_package_for(
        &self,
        class_name: &str,
    ) -> Result<Option<Arc<PackageDefinition>>, Error> {
        let Some(package) = package_name(class_name) else {
            return Ok(None);
        };
        if let Some(existing) = self.packages.lock().unwrap().get(package) {
            return Ok(Some(Arc::clone(existing)));
        }

        let resource = class_resource_name(class_name);
        let mut fallback = None;
        let mut definition = None;
        for entry in &self.entries {
            if !entry.archive.contains_entry(&resource).unwrap_or(false) {
                continue;
            }
            match entry.archive.manifest()? {
                Some(manifest) => {
                    definition = Some(package_definition(package, &manifest));
                    break;
                }
                None => {
                    fallback.get_or_insert_with(|| PackageDefinition {
                        name: package.to_owned(),
                        implementation_title: None,
                        implementation_version: None,
                        sealed: false,
                    });
                }
            }
        }
        let Some(definition) = definition.or(fallback) else {
            return Ok(None);
        };

        let mut packages = self.packages.lock().unwrap();
        let winner = packages
            .entry(package.to_owned())
            .or_insert_with(|| Arc::new(definition));
        Ok(Some(Arc::clone(winner)))
    }
}

/// `a.b.C` → `a/b/C.class`.
fn class_resource_name(binary_name: &str) -> String {
    let mut resource = binary_name.replace('.', "/");
    resource.push_str(".class");
    resource
}

/// `a.b.C` → `a.b`; classes in the default package have no package to
/// define.
fn package_name(binary_name: &str) -> Option<&str> {
    binary_name.rsplit_once('.').map(|(package, _)| package)
}

fn package_definition(package: &str, manifest: &Manifest) -> PackageDefinition {
    let section_name = format!("{}/", package.replace('.', "/"));
    let section = manifest.attributes_for(&section_name);
    let lookup = |name: &str| {
        section
            .and_then(|attributes| attributes.value(name))
            .or_else(|| manifest.main_attributes().value(name))
            .map(ToOwned::to_owned)
    };
    PackageDefinition {
        name: package.to_owned(),
        implementation_title: lookup(attribute_names::IMPLEMENTATION_TITLE),
        implementation_version: lookup(attribute_names::IMPLEMENTATION_VERSION),
        sealed: lookup(attribute_names::SEALED)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
    }
}

fn matching_entries(
    archive: &Archive,
    search_filter: Option<EntryFilter<'_>>,
    include_filter: Option<EntryFilter<'_>>,
) -> Result<Vec<ArchiveEntry>, Error> {
    Ok(archive
        .entries()?
        .into_iter()
        .filter(|entry| {
            search_filter.map(|f| f(entry)).unwrap_or(true)
                && include_filter.map(|f| f(entry)).unwrap_or(true)
        })
        .collect())
}

/// The exploded-layout ordering rule: unindexed directory roots, then the
/// indexed entries in listed order, then unindexed leftovers in discovery
/// order.
fn ordered_by_index(
    entries: Vec<ArchiveEntry>,
    index_file: &ClassPathIndexFile,
) -> Vec<ArchiveEntry> {
    let mut roots = Vec::new();
    let mut indexed: Vec<(usize, ArchiveEntry)> = Vec::new();
    let mut leftovers = Vec::new();
    for entry in entries {
        match index_file.position(entry.name()) {
            Some(position) => indexed.push((position, entry)),
            None if entry.is_directory() => roots.push(entry),
            None => leftovers.push(entry),
        }
    }
    indexed.sort_by_key(|(position, _)| *position);
    roots
        .into_iter()
        .chain(indexed.into_iter().map(|(_, entry)| entry))
        .chain(leftovers)
        .collect()
}

use crate::fixtures::{inner_jar, temp_archive, ZipBuilder};
use nestjar::{Archive, ArchiveEntry, ClassPathResolver, ResourceUrl, UrlContent};
use std::io::Read;
use url::Url;

fn read_url(url: &ResourceUrl) -> Vec<u8> {
    match url.open().unwrap() {
        UrlContent::Stream(mut reader) => {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            out
        }
        UrlContent::Archive(_) => panic!("expected a stream"),
    }
}

fn lib_jar_filter(entry: &ArchiveEntry) -> bool {
    entry.name().starts_with("lib/") && !entry.is_directory()
}

#[test]
fn test_resource_in_nested_jar_resolves_to_composite_url() {
    let outer = ZipBuilder::new()
        .stored("lib/foo.jar", inner_jar("m/r.txt", &[0x03]))
        .build();
    let (_dir, path) = temp_archive(&outer);

    let archive = Archive::open(&path).unwrap();
    let resolver = ClassPathResolver::assemble(&archive, None, Some(&lib_jar_filter)).unwrap();

    let found = resolver.find_resource("m/r.txt").unwrap();
    let root = Url::from_file_path(&path).unwrap();
    assert_eq!(found.to_string(), format!("jar:{root}!/lib/foo.jar!/m/r.txt"));
    assert_eq!(read_url(&found), [0x03]);
    assert!(resolver.find_resource("absent.txt").is_none());
}

#[test]
fn test_compressed_nested_jar_entry_still_streams() {
    let inner = inner_jar("m/r.txt", &[0x03]);
    let outer = ZipBuilder::new()
        .deflated("a/b.jar", inner.clone())
        .build();
    let (_dir, path) = temp_archive(&outer);

    let mut resolver = ClassPathResolver::new();
    resolver.push(Archive::open(&path).unwrap()).unwrap();

    let found = resolver.find_resource("a/b.jar").unwrap();
    assert_eq!(read_url(&found), inner);
}

#[test]
fn test_classpath_urls_follow_entry_order() {
    let outer = ZipBuilder::new()
        .directory("classes/")
        .stored("classes/com/x/Y.class", &b"y"[..])
        .stored("lib/x.jar", inner_jar("x.txt", b"x"))
        .stored("lib/y.jar", inner_jar("y.txt", b"y"))
        .build();
    let (_dir, path) = temp_archive(&outer);

    let archive = Archive::open(&path).unwrap();
    let include = |entry: &ArchiveEntry| entry.name() == "classes/" || lib_jar_filter(entry);
    let resolver = ClassPathResolver::assemble(&archive, None, Some(&include)).unwrap();

    let root = Url::from_file_path(&path).unwrap();
    let urls: Vec<String> = resolver
        .find_resources("")
        .into_iter()
        .map(|url| url.to_string())
        .collect();
    assert_eq!(
        urls,
        [
            format!("jar:{root}!/classes!/"),
            format!("jar:{root}!/lib/x.jar!/"),
            format!("jar:{root}!/lib/y.jar!/"),
        ]
    );

    // First-match lookup follows the same declared order.
    let class = resolver.find_resource("com/x/Y.class").unwrap();
    assert_eq!(class.to_string(), format!("jar:{root}!/classes!/com/x/Y.class"));
}

#[test]
fn test_exploded_classpath_honours_index_ordering() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("classes")).unwrap();
    std::fs::write(root.join("classes/A.class"), b"a").unwrap();
    std::fs::create_dir_all(root.join("lib")).unwrap();
    for name in ["x", "y", "z", "extra"] {
        std::fs::write(
            root.join(format!("lib/{name}.jar")),
            inner_jar(&format!("{name}.txt"), name.as_bytes()),
        )
        .unwrap();
    }
    std::fs::write(
        root.join("classpath.idx"),
        "- \"lib/x.jar\"\n- \"lib/y.jar\"\n- \"lib/z.jar\"\n",
    )
    .unwrap();

    let archive = Archive::exploded(root).unwrap();
    let include = |entry: &ArchiveEntry| {
        entry.name() == "classes/" || (lib_jar_filter(entry) && entry.name().ends_with(".jar"))
    };
    let resolver = ClassPathResolver::assemble(&archive, None, Some(&include)).unwrap();

    let urls: Vec<String> = resolver
        .find_resources("")
        .into_iter()
        .map(|url| url.to_string())
        .collect();
    assert_eq!(urls.len(), 5);
    assert!(urls[0].ends_with("classes/"));
    assert!(urls[1].ends_with("x.jar!/"));
    assert!(urls[2].ends_with("y.jar!/"));
    assert!(urls[3].ends_with("z.jar!/"));
    assert!(urls[4].ends_with("extra.jar!/"));
}

#[test]
fn test_empty_name_yields_one_url_per_root_in_order() {
    let first = ZipBuilder::new().stored("a.txt", &b"a"[..]).build();
    let second = ZipBuilder::new().stored("b.txt", &b"b"[..]).build();
    let (_dir0, path0) = temp_archive(&first);
    let (_dir1, path1) = temp_archive(&second);

    let mut resolver = ClassPathResolver::new();
    resolver.push(Archive::open(&path0).unwrap()).unwrap();
    resolver.push(Archive::open(&path1).unwrap()).unwrap();

    let roots = resolver.find_resources("");
    assert_eq!(roots.len(), 2);
    let root0 = Url::from_file_path(&path0).unwrap();
    let root1 = Url::from_file_path(&path1).unwrap();
    assert_eq!(roots[0].to_string(), format!("jar:{root0}!/"));
    assert_eq!(roots[1].to_string(), format!("jar:{root1}!/"));
    assert_eq!(resolver.find_resource("").unwrap(), roots[0]);
}

#[test]
fn test_find_resources_includes_duplicates_in_order() {
    let first = ZipBuilder::new().stored("common.txt", &b"1"[..]).build();
    let second = ZipBuilder::new().stored("common.txt", &b"2"[..]).build();
    let (_dir0, path0) = temp_archive(&first);
    let (_dir1, path1) = temp_archive(&second);

    let mut resolver = ClassPathResolver::new();
    resolver.push(Archive::open(&path0).unwrap()).unwrap();
    resolver.push(Archive::open(&path1).unwrap()).unwrap();

    let all = resolver.find_resources("common.txt");
    assert_eq!(all.len(), 2);
    assert_eq!(read_url(&all[0]), b"1");
    assert_eq!(read_url(&all[1]), b"2");

    // First match wins for the single-result lookup.
    assert_eq!(resolver.find_resource("common.txt").unwrap(), all[0]);
}

#[test]
fn test_load_class_bytes_translates_binary_names() {
    let lib = ZipBuilder::new()
        .stored("com/example/App.class", &b"\xCA\xFE\xBA\xBE\0\0"[..])
        .build();
    let (_dir, path) = temp_archive(&lib);

    let mut resolver = ClassPathResolver::new();
    resolver.push(Archive::open(&path).unwrap()).unwrap();

    let bytes = resolver.load_class_bytes("com.example.App").unwrap().unwrap();
    assert_eq!(bytes, b"\xCA\xFE\xBA\xBE\0\0");
    assert!(resolver.load_class_bytes("com.example.Missing").unwrap().is_none());
}

#[test]
fn test_define_package_uses_enclosing_manifest() {
    let manifest = "Implementation-Title: demo-lib\r\n\
                    Implementation-Version: 2.5\r\n\
                    \r\n\
                    Name: com/example/sealed/\r\n\
                    Sealed: true\r\n\
                    \r\n";
    let lib = ZipBuilder::new()
        .stored("META-INF/MANIFEST.MF", manifest.as_bytes().to_vec())
        .stored("com/example/App.class", &b"a"[..])
        .stored("com/example/sealed/Secret.class", &b"s"[..])
        .build();
    let (_dir, path) = temp_archive(&lib);

    let mut resolver = ClassPathResolver::new();
    resolver.push(Archive::open(&path).unwrap()).unwrap();

    let open = resolver
        .define_package_for("com.example.App")
        .unwrap()
        .unwrap();
    assert_eq!(open.name(), "com.example");
    assert_eq!(open.implementation_title(), Some("demo-lib"));
    assert_eq!(open.implementation_version(), Some("2.5"));
    assert!(!open.is_sealed());

    let sealed = resolver
        .define_package_for("com.example.sealed.Secret")
        .unwrap()
        .unwrap();
    assert!(sealed.is_sealed());

    // Racing definers all observe the first winner.
    let again = resolver
        .define_package_for("com.example.App")
        .unwrap()
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&open, &again));

    assert!(resolver
        .define_package_for("NoPackage")
        .unwrap()
        .is_none());
}

#[test]
fn test_concurrent_lookups_share_one_resolver() {
    let outer = ZipBuilder::new()
        .stored("lib/foo.jar", inner_jar("m/r.txt", &[0x03]))
        .build();
    let (_dir, path) = temp_archive(&outer);
    let archive = Archive::open(&path).unwrap();
    let resolver = std::sync::Arc::new(
        ClassPathResolver::assemble(&archive, None, Some(&lib_jar_filter)).unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let resolver = std::sync::Arc::clone(&resolver);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    assert!(resolver.find_resource("m/r.txt").is_some());
                    assert!(resolver.find_resource("nope").is_none());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

//! Lexical path arithmetic for build-file paths.
//!
//! Build files refer to each other and to their sources with `/`-separated
//! relative paths. Everything here is pure string manipulation; the
//! filesystem is never consulted, so the same inputs always produce the same
//! outputs regardless of what exists on disk.

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// The directory portion of a path: `"a/b.bp"` → `"a"`, `"b.bp"` → `""`,
/// `"/b.bp"` → `"/"`.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(index) => &path[..index],
        None => "",
    }
}

/// Join two paths. An absolute right side wins outright.
pub fn join(left: &str, right: &str) -> String {
    if is_absolute(right) || left.is_empty() {
        right.to_owned()
    } else if left.ends_with('/') {
        format!("{}{}", left, right)
    } else {
        format!("{}/{}", left, right)
    }
}

/// Collapse `.`, `..`, and repeated separators. Purely lexical: `..` at the
/// front of a relative path is preserved, `..` above the root is dropped.
pub fn normalize(path: &str) -> String {
    let absolute = is_absolute(path);
    let mut parts: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                if let Some(last) = parts.last() {
                    if *last != ".." {
                        parts.pop();
                        continue;
                    }
                }
                if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

/// Assuming both arguments are relative to the same place, compute a path
/// that identifies `path` relative to `relative_to`.
pub fn relative(path: &str, relative_to: &str) -> String {
    let (path, relative_to) = if is_absolute(path) != is_absolute(relative_to) {
        // One side is anchored, so anchor both at the working directory.
        (absolutize(path), absolutize(relative_to))
    } else {
        (normalize(path), normalize(relative_to))
    };

    // "." means "no components", not a subdirectory named ".".
    let path_split = components(&path);
    let relative_to_split = components(&relative_to);

    let prefix_len = path_split
        .iter()
        .zip(relative_to_split.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative_split: Vec<&str> = Vec::new();
    relative_split.resize(relative_to_split.len() - prefix_len, "..");
    relative_split.extend_from_slice(&path_split[prefix_len..]);

    if relative_split.is_empty() {
        ".".to_owned()
    } else {
        relative_split.join("/")
    }
}

fn components(path: &str) -> Vec<&str> {
    if path == "." {
        Vec::new()
    } else {
        path.split('/').collect()
    }
}

fn absolutize(path: &str) -> String {
    if is_absolute(path) {
        normalize(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_default();
        normalize(&join(&cwd.to_string_lossy(), path))
    }
}

/// Re-express a path item that was written relative to `from_file`'s
/// directory so that it is relative to `to_file`'s directory instead.
pub fn rebase(item: &str, from_file: &str, to_file: &str) -> String {
    normalize(&join(
        &relative(dirname(from_file), dirname(to_file)),
        item,
    ))
}

/// Split a target reference into its build file and target name. A bare name
/// refers to `build_file` itself; a `path:name` reference is resolved
/// relative to `build_file`'s directory and normalized.
pub fn split_reference(build_file: &str, reference: &str) -> (String, String) {
    match reference.split_once(':') {
        Some((file_rel, target)) => (
            normalize(&join(dirname(build_file), file_rel)),
            target.to_owned(),
        ),
        None => (build_file.to_owned(), reference.to_owned()),
    }
}

/// The canonical `build_file:target` form of a reference.
pub fn qualify(build_file: &str, reference: &str) -> String {
    let (file, target) = split_reference(build_file, reference);
    format!("{}:{}", file, target)
}

/// The build-file half of an already-qualified target.
pub fn build_file_of(qualified: &str) -> String {
    split_reference("", qualified).0
}

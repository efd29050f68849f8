//! Ordered list of chunk download links produced by a successful request.

/// Download link of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub url: String,
    /// Volume name of the chunk.
    pub name: String,
}

/// Chunk links in upload order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, url: impl Into<String>, name: impl Into<String>) {
        self.entries.push(ManifestEntry {
            url: url.into(),
            name: name.into(),
        });
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One `url<TAB>name` line per chunk.
    pub fn to_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}\t{}", e.url, e.name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Successful result of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Logical name of the fetched file.
    pub file_name: String,
    pub total_size: u64,
    pub manifest: Manifest,
}

impl Delivery {
    /// File name under which the manifest is handed to the requester.
    pub fn attachment_name(&self) -> String {
        attachment_name(&self.file_name)
    }

    /// Short description sent with the manifest, e.g. `video.mp4 (2,048KB)`.
    pub fn caption(&self) -> String {
        format!("{} ({}KB)", self.file_name, group_thousands(self.total_size / 1024))
    }
}

/// Manifest attachment name for `file_name`: its ASCII characters plus `.txt`.
pub fn attachment_name(file_name: &str) -> String {
    let mut name: String = file_name.chars().filter(char::is_ascii).collect();
    name.push_str(".txt");
    name
}

pub(crate) fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

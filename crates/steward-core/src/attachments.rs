//! Attachment staging.
//!
//! Uploaded files ride along with a request as raw bytes. Before the request
//! reaches the agent they are staged into the per-user files directory and
//! referenced from the request text, with a hint about what kind of file it
//! is so the agent knows how to approach it.

use std::io;
use std::path::{Component, Path, PathBuf};

/// One uploaded file accompanying a request.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Coarse file classification used to phrase the agent instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Code,
    Text,
    Unknown,
}

impl FileKind {
    /// Classify by extension.
    pub fn for_name(name: &str) -> Self {
        let ext = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_lowercase(),
            None => String::new(),
        };

        const IMAGE: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];
        const CODE: &[&str] = &[
            "py", "js", "ts", "java", "cpp", "c", "h", "go", "rs", "rb", "php",
        ];
        const TEXT: &[&str] = &[
            "txt", "json", "md", "log", "yaml", "yml", "toml", "ini", "cfg", "sh", "bash",
        ];

        if IMAGE.contains(&ext.as_str()) {
            FileKind::Image
        } else if CODE.contains(&ext.as_str()) {
            FileKind::Code
        } else if TEXT.contains(&ext.as_str()) {
            FileKind::Text
        } else {
            FileKind::Unknown
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            FileKind::Image => "Look at the image and",
            FileKind::Code => "Read the code and",
            FileKind::Text => "Read the file and",
            FileKind::Unknown => "Analyze the file and",
        }
    }
}

/// Stage an attachment under `{files_dir}/{user_id}/` and return its path.
///
/// The file name must be a single normal path component; anything that could
/// traverse out of the staging directory is rejected.
pub fn stage(files_dir: &Path, user_id: i64, attachment: &Attachment) -> io::Result<PathBuf> {
    validate_file_name(&attachment.name)?;

    let user_dir = files_dir.join(user_id.to_string());
    std::fs::create_dir_all(&user_dir)?;

    let path = user_dir.join(&attachment.name);
    std::fs::write(&path, &attachment.bytes)?;
    log::info!(
        "staged attachment {} ({} bytes) for user {user_id}",
        attachment.name,
        attachment.bytes.len()
    );
    Ok(path)
}

fn validate_file_name(name: &str) -> io::Result<()> {
    if name.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "attachment name cannot be empty",
        ));
    }

    let path = Path::new(name);
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(_)) if components.next().is_none() => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid attachment name: {name}"),
        )),
    }
}

/// Rewrite the request text to reference staged files.
///
/// An empty request falls back to a generic "analyze this file" ask, the way
/// an upload with no caption should still do something useful.
pub fn annotate_request(request_text: &str, staged: &[(PathBuf, FileKind)]) -> String {
    if staged.is_empty() {
        return request_text.to_string();
    }

    let caption = if request_text.trim().is_empty() {
        "analyze this file"
    } else {
        request_text.trim()
    };

    let mut text = String::from("[FILE ACCESS GRANTED] ");
    for (i, (path, kind)) in staged.iter().enumerate() {
        if i == 0 {
            text.push_str(kind.instruction());
            text.push(' ');
            text.push_str(caption);
            text.push('.');
        }
        text.push_str(&format!(" File: {}", path.display()));
    }
    text
}

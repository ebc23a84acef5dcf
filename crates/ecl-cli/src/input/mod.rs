pub mod file;
pub mod stdin;

use serde::de::DeserializeOwned;

/// Load a command's input document from `--input` or piped stdin.
pub fn load<T: DeserializeOwned>(
    path: Option<&str>,
    command: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        tracing::debug!(command, path, "reading input file");
        return file::read_document(path);
    }
    match stdin::read_stdin()? {
        Some(data) => {
            tracing::debug!(command, "reading input from stdin");
            Ok(serde_json::from_value(data)?)
        }
        None => Err(format!("--input file (or piped JSON) is required for {command}").into()),
    }
}

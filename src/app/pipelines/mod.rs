pub mod count_pipeline;
pub mod evaluate_pipeline;
pub mod select_logits_pipeline;
pub mod sft_pipeline;

pub use count_pipeline::CountPipeline;
pub use evaluate_pipeline::EvaluatePipeline;
pub use select_logits_pipeline::SelectLogitsPipeline;
pub use sft_pipeline::SftPipeline;

use crate::utils::error::Result;
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

/// Bundles `(name, contents)` pairs into an in-memory zip archive.
pub(crate) fn bundle_zip(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, contents) in files {
        zip.start_file::<_, ()>(name.as_str(), FileOptions::default())?;
        zip.write_all(contents)?;
    }
    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_bundle_zip_contains_every_file() {
        let files = vec![
            ("pred.jsonl".to_string(), b"{}\n".to_vec()),
            ("summary.csv".to_string(), b"scope\n".to_vec()),
        ];
        let bytes = bundle_zip(&files).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut content = String::new();
        archive
            .by_name("summary.csv")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "scope\n");
    }
}

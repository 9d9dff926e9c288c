//! Upload classification and converter selection.
//!
//! Routing is data: [`ROUTES`] is an ordered table of predicates, each paired
//! with the [`Strategy`] that converts matching files. The first route whose
//! MIME prefix or extension set matches wins. Only the declared (or guessed)
//! MIME type and the filename extension are consulted, never file contents.

use crate::config::ConverterPrograms;
use crate::error::ConvertError;
use crate::job::ConversionJob;
use crate::runner::Invocation;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Broad file family an upload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Image,
    Audio,
    Video,
    Document,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Image => write!(f, "image"),
            Category::Audio => write!(f, "audio"),
            Category::Video => write!(f, "video"),
            Category::Document => write!(f, "document"),
        }
    }
}

/// Converter command template plus its output path rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `convert <input> <output>`, output `{id}.{target}`.
    SingleShotImage,
    /// `ffmpeg -y -i <input> <output>`, output `{id}.{target}`.
    MediaTranscode,
    /// `soffice --headless --convert-to pdf --outdir <dir> <input>`,
    /// output `{input-stem}.pdf` as chosen by the office tool.
    OfficeToPdf,
}

/// One row of the routing table.
#[derive(Debug)]
pub struct Route {
    pub category: Category,
    pub mime_prefix: Option<&'static str>,
    pub extensions: &'static [&'static str],
    pub strategy: Strategy,
}

impl Route {
    pub fn matches(&self, mime: &str, extension: &str) -> bool {
        let mime_match = self
            .mime_prefix
            .is_some_and(|prefix| mime.starts_with(prefix));
        mime_match || self.extensions.contains(&extension)
    }
}

pub const ROUTES: &[Route] = &[
    Route {
        category: Category::Image,
        mime_prefix: Some("image/"),
        extensions: &[".png", ".jpg", ".jpeg", ".webp", ".gif", ".tiff", ".bmp"],
        strategy: Strategy::SingleShotImage,
    },
    Route {
        category: Category::Audio,
        mime_prefix: Some("audio/"),
        extensions: &[".mp3", ".wav", ".aac", ".flac", ".ogg", ".m4a"],
        strategy: Strategy::MediaTranscode,
    },
    Route {
        category: Category::Video,
        mime_prefix: Some("video/"),
        extensions: &[".mp4", ".mov", ".mkv", ".avi", ".webm"],
        strategy: Strategy::MediaTranscode,
    },
    Route {
        category: Category::Document,
        mime_prefix: None,
        extensions: &[
            ".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx", ".odt", ".odp", ".ods",
        ],
        strategy: Strategy::OfficeToPdf,
    },
];

/// Returns the first route matching `mime` or `extension`.
pub fn classify(mime: &str, extension: &str) -> Option<&'static Route> {
    ROUTES.iter().find(|route| route.matches(mime, extension))
}

/// Declared content type when present, otherwise a guess from `filename`.
pub fn resolve_mime(declared: Option<&str>, filename: &str) -> String {
    match declared.map(str::trim).filter(|m| !m.is_empty()) {
        Some(mime) => mime.to_lowercase(),
        None => mime_guess::from_path(filename)
            .first_raw()
            .unwrap_or_default()
            .to_string(),
    }
}

impl Strategy {
    /// Builds the converter invocation for `job` and the path it must produce.
    ///
    /// `job.target_format` must already be set.
    pub fn plan(
        &self,
        job: &ConversionJob,
        programs: &ConverterPrograms,
        outputs_dir: &Path,
    ) -> Result<Invocation, ConvertError> {
        let target = job
            .target_format
            .as_deref()
            .ok_or_else(|| ConvertError::bad_request("Missing target format"))?;
        let input = job.input_path.clone();

        let invocation = match self {
            Strategy::SingleShotImage => {
                let output = outputs_dir.join(format!("{}.{}", job.id, target));
                Invocation::new(&programs.image, input, output)
                    .arg_path(&job.input_path)
                    .output_arg()
            }
            Strategy::MediaTranscode => {
                let output = outputs_dir.join(format!("{}.{}", job.id, target));
                Invocation::new(&programs.media, input, output)
                    .arg("-y")
                    .arg("-i")
                    .arg_path(&job.input_path)
                    .output_arg()
            }
            Strategy::OfficeToPdf => {
                if target != "pdf" {
                    return Err(ConvertError::bad_request(
                        "Only pdf output supported for document inputs",
                    ));
                }
                let stem = job
                    .input_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| job.id.clone());
                let output = outputs_dir.join(format!("{}.pdf", stem));
                Invocation::new(&programs.office, input, output)
                    .arg("--headless")
                    .arg("--convert-to")
                    .arg("pdf")
                    .arg("--outdir")
                    .arg_path(outputs_dir)
                    .arg_path(&job.input_path)
            }
        };
        Ok(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn category(mime: &str, ext: &str) -> Option<Category> {
        classify(mime, ext).map(|route| route.category)
    }

    fn job(filename: &str, target: &str) -> ConversionJob {
        let mut job = ConversionJob::new(
            filename.to_string(),
            String::new(),
            Path::new("/data/uploads"),
        );
        job.target_format = Some(target.to_string());
        job
    }

    #[test]
    fn test_classify_by_extension() {
        for ext in [".png", ".jpg", ".jpeg", ".webp", ".gif", ".tiff", ".bmp"] {
            assert_eq!(category("", ext), Some(Category::Image), "{ext}");
        }
        for ext in [".mp3", ".wav", ".aac", ".flac", ".ogg", ".m4a"] {
            assert_eq!(category("", ext), Some(Category::Audio), "{ext}");
        }
        for ext in [".mp4", ".mov", ".mkv", ".avi", ".webm"] {
            assert_eq!(category("", ext), Some(Category::Video), "{ext}");
        }
        for ext in [".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx", ".odt", ".odp", ".ods"] {
            assert_eq!(category("", ext), Some(Category::Document), "{ext}");
        }
    }

    #[test]
    fn test_classify_by_mime_prefix() {
        assert_eq!(category("image/heic", ".heic"), Some(Category::Image));
        assert_eq!(category("audio/opus", ""), Some(Category::Audio));
        assert_eq!(category("video/3gpp", ".3gp"), Some(Category::Video));
    }

    #[test]
    fn test_first_match_wins() {
        // Declared image type beats the document extension.
        assert_eq!(category("image/png", ".docx"), Some(Category::Image));
        // Audio is checked before video.
        assert_eq!(category("audio/mp4", ".mp4"), Some(Category::Audio));
    }

    #[test]
    fn test_unmatched() {
        assert_eq!(category("application/zip", ".zip"), None);
        assert_eq!(category("", ""), None);
        // Documents have no MIME prefix rule.
        assert_eq!(category("application/msword", ".bin"), None);
    }

    #[test]
    fn test_resolve_mime() {
        assert_eq!(resolve_mime(Some("Image/PNG"), "a.bin"), "image/png");
        assert_eq!(resolve_mime(None, "song.mp3"), "audio/mpeg");
        assert_eq!(resolve_mime(Some(""), "clip.mp4"), "video/mp4");
        assert_eq!(resolve_mime(None, "mystery"), "");
    }

    #[test]
    fn test_plan_image() {
        let job = job("photo.png", "jpg");
        let invocation = Strategy::SingleShotImage
            .plan(&job, &ConverterPrograms::default(), Path::new("/data/outputs"))
            .unwrap();

        let output = PathBuf::from(format!("/data/outputs/{}.jpg", job.id));
        assert_eq!(invocation.program, "convert");
        assert_eq!(
            invocation.args,
            vec![
                job.input_path.to_string_lossy().into_owned(),
                output.to_string_lossy().into_owned(),
            ]
        );
        assert_eq!(invocation.output, output);
    }

    #[test]
    fn test_plan_media() {
        let job = job("clip.mov", "mp4");
        let invocation = Strategy::MediaTranscode
            .plan(&job, &ConverterPrograms::default(), Path::new("/data/outputs"))
            .unwrap();

        assert_eq!(invocation.program, "ffmpeg");
        assert_eq!(invocation.args[..2], ["-y".to_string(), "-i".to_string()]);
        let output = invocation.output.to_string_lossy().into_owned();
        assert_eq!(invocation.args.last(), Some(&output));
    }

    #[test]
    fn test_plan_document() {
        let job = job("report.docx", "pdf");
        let invocation = Strategy::OfficeToPdf
            .plan(&job, &ConverterPrograms::default(), Path::new("/data/outputs"))
            .unwrap();

        assert_eq!(invocation.program, "soffice");
        assert_eq!(
            invocation.args,
            vec![
                "--headless".to_string(),
                "--convert-to".to_string(),
                "pdf".to_string(),
                "--outdir".to_string(),
                "/data/outputs".to_string(),
                job.input_path.to_string_lossy().into_owned(),
            ]
        );
        assert_eq!(
            invocation.output,
            PathBuf::from(format!("/data/outputs/{}.pdf", job.id))
        );
    }

    #[test]
    fn test_plan_document_rejects_non_pdf() {
        let job = job("slides.pptx", "png");
        let err = Strategy::OfficeToPdf
            .plan(&job, &ConverterPrograms::default(), Path::new("/data/outputs"))
            .unwrap_err();

        assert!(matches!(err, ConvertError::BadRequest(_)));
    }
}

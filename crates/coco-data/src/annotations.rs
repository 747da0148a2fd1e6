use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use vocab::Vocab;

use crate::error::Result;

#[derive(Debug, Deserialize)]
struct CocoCaptionFile {
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
}

#[derive(Debug, Deserialize)]
struct CocoImage {
    id: i64,
    file_name: String,
}

#[derive(Debug, Deserialize)]
struct CocoAnnotation {
    id: i64,
    image_id: i64,
    caption: String,
}

/// One (image, caption) pair with the caption already encoded as word ids,
/// bracketed by the start and end tokens. Immutable for the whole run.
#[derive(Debug, Clone)]
pub struct AnnotationRecord {
    pub id: i64,
    pub image_id: i64,
    pub caption: Vec<i64>,
}

/// Load a COCO captions file, encoding every caption with `vocab`.
///
/// Returns the annotation records plus the image-id → file-name map the
/// dataset uses to locate images on disk.
pub fn load_annotations<P: AsRef<Path>>(
    path: P,
    vocab: &Vocab,
) -> Result<(Vec<AnnotationRecord>, HashMap<i64, String>)> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let parsed: CocoCaptionFile = serde_json::from_reader(reader)?;

    let image_files: HashMap<i64, String> = parsed
        .images
        .into_iter()
        .map(|image| (image.id, image.file_name))
        .collect();

    let start = vocab.start_id() as i64;
    let end = vocab.end_id() as i64;

    let records: Vec<AnnotationRecord> = parsed
        .annotations
        .into_iter()
        .map(|ann| {
            let mut caption = Vec::with_capacity(ann.caption.len() / 4 + 2);
            caption.push(start);
            caption.extend(vocab.encode(&ann.caption).into_iter().map(|id| id as i64));
            caption.push(end);
            AnnotationRecord {
                id: ann.id,
                image_id: ann.image_id,
                caption,
            }
        })
        .collect();

    log::info!(
        "loaded {} annotation records over {} images",
        records.len(),
        image_files.len()
    );

    Ok((records, image_files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn captions_are_bracketed_with_start_and_end() {
        let path = std::env::temp_dir().join(format!("annotations_{}.json", std::process::id()));
        let json = r#"{
            "images": [{"id": 7, "file_name": "img7.jpg"}],
            "annotations": [{"id": 1, "image_id": 7, "caption": "a dog"}]
        }"#;
        let mut file = File::create(&path).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let mut vocab = Vocab::new();
        for word in ["a", "dog"] {
            let id = vocab.len() as u32;
            vocab.insert(word.to_string(), id);
        }

        let (records, image_files) = load_annotations(&path, &vocab).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(records.len(), 1);
        assert_eq!(image_files.get(&7).unwrap(), "img7.jpg");

        let caption = &records[0].caption;
        assert_eq!(caption[0], vocab.start_id() as i64);
        assert_eq!(*caption.last().unwrap(), vocab.end_id() as i64);
        assert_eq!(caption.len(), 4);
    }
}

//! COCO instance annotations.

use super::FileRecord;
use crate::{
    common::*,
    unit::{OrigPixel, RectLabel},
};

#[derive(Debug, Clone, Deserialize)]
struct CocoFile {
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
    categories: Vec<CocoCategory>,
}

#[derive(Debug, Clone, Deserialize)]
struct CocoImage {
    id: u64,
    file_name: PathBuf,
    width: usize,
    height: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct CocoAnnotation {
    id: u64,
    image_id: u64,
    category_id: u64,
    /// `[x, y, w, h]` with top-left origin.
    bbox: [f64; 4],
    #[serde(default)]
    iscrowd: u8,
}

#[derive(Debug, Clone, Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,
}

/// Loading options of [`CocoDataset`].
#[derive(Debug, Clone)]
pub struct CocoDatasetInit {
    pub include_crowd: bool,
    pub max_instances: usize,
}

impl Default for CocoDatasetInit {
    fn default() -> Self {
        Self {
            include_crowd: false,
            max_instances: 100,
        }
    }
}

/// A COCO dataset resolved into per-image records.
#[derive(Debug, Clone)]
pub struct CocoDataset {
    pub classes: ClassMap,
    /// Images with at least one usable annotation, in file order.
    pub records: Vec<Arc<FileRecord>>,
}

impl CocoDatasetInit {
    pub fn load<P1, P2>(self, annotation_file: P1, image_dir: P2) -> Result<CocoDataset>
    where
        P1: AsRef<Path>,
        P2: AsRef<Path>,
    {
        let annotation_file = annotation_file.as_ref();
        let text = std::fs::read_to_string(annotation_file).with_context(|| {
            format!(
                "unable to read annotation file '{}'",
                annotation_file.display()
            )
        })?;
        self.load_str(&text, image_dir)
    }

    pub fn load_str<P>(self, text: &str, image_dir: P) -> Result<CocoDataset>
    where
        P: AsRef<Path>,
    {
        let Self {
            include_crowd,
            max_instances,
        } = self;
        ensure!(max_instances > 0, "max_instances must be positive");
        let image_dir = image_dir.as_ref();

        let CocoFile {
            images,
            annotations,
            categories,
        } = serde_json::from_str(text).context("invalid COCO annotation format")?;

        let classes = ClassMap::from_categories(
            categories
                .into_iter()
                .map(|category| (category.id, category.name)),
        )?;

        let mut labels: IndexMap<u64, Vec<_>> = images
            .iter()
            .map(|image| (image.id, vec![]))
            .collect();
        ensure!(
            labels.len() == images.len(),
            "duplicated image id found"
        );

        let mut num_crowd = 0;
        let mut num_degenerate = 0;
        let mut num_truncated = 0;

        for ann in annotations {
            let class = classes.class_index(ann.category_id).ok_or_else(|| {
                format_err!(
                    "annotation {} refers to unknown category id {}",
                    ann.id,
                    ann.category_id
                )
            })?;
            let image_labels = labels.get_mut(&ann.image_id).ok_or_else(|| {
                format_err!(
                    "annotation {} refers to unknown image id {}",
                    ann.id,
                    ann.image_id
                )
            })?;

            if ann.iscrowd != 0 && !include_crowd {
                num_crowd += 1;
                continue;
            }

            let [x, y, w, h] = ann.bbox;
            if !(w > 0.0 && h > 0.0) || ![x, y].iter().all(|v| v.is_finite()) {
                warn!(
                    "drop degenerate box {:?} of annotation {}",
                    ann.bbox, ann.id
                );
                num_degenerate += 1;
                continue;
            }

            if image_labels.len() >= max_instances {
                warn!(
                    "image {} has more than {} instances, drop annotation {}",
                    ann.image_id, max_instances, ann.id
                );
                num_truncated += 1;
                continue;
            }

            let rect = CyCxHW::try_from_tlhw([r64(y), r64(x), r64(h), r64(w)])?;
            image_labels.push(OrigPixel(RectLabel { rect, class }));
        }

        let num_images = images.len();
        let records: Vec<_> = images
            .into_iter()
            .filter_map(|image| {
                let labels = labels.remove(&image.id)?;
                if labels.is_empty() {
                    return None;
                }
                Some((image, labels))
            })
            .map(|(image, labels)| -> Result<_> {
                let CocoImage {
                    id,
                    file_name,
                    width,
                    height,
                } = image;
                let size = OrigPixel(HW::try_from_hw([height, width])?);
                ensure!(
                    height > 0 && width > 0,
                    "image {} has zero size",
                    id
                );
                Ok(Arc::new(FileRecord {
                    image_id: id,
                    path: image_dir.join(file_name),
                    size,
                    labels,
                }))
            })
            .try_collect()?;

        info!(
            "loaded {} of {} images, {} classes, dropped {} crowd, {} degenerate and {} excess annotations",
            records.len(),
            num_images,
            classes.len(),
            num_crowd,
            num_degenerate,
            num_truncated
        );

        Ok(CocoDataset { classes, records })
    }
}

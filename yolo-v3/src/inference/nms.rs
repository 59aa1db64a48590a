use crate::common::*;

/// Greedy per-class non-maximum suppression.
///
/// Boxes are grouped by class in order of first appearance. Each group is stably
/// sorted by descending score, then every box overlapping an already kept box by
/// `iou_threshold` or more is dropped. Returns indexes of kept boxes, grouped by
/// class and in descending score within a group.
pub fn non_max_suppression(
    rects: &[CyCxHW<f64>],
    scores: &[f64],
    classes: &[usize],
    iou_threshold: f64,
) -> Result<Vec<usize>> {
    ensure!(
        rects.len() == scores.len() && rects.len() == classes.len(),
        "rects, scores and classes must have the same length"
    );

    let mut groups: IndexMap<usize, Vec<usize>> = IndexMap::new();
    for (index, &class) in classes.iter().enumerate() {
        groups.entry(class).or_default().push(index);
    }

    let keep = groups
        .into_iter()
        .flat_map(|(_class, mut indexes)| {
            indexes.sort_by(|&lhs, &rhs| {
                scores[rhs]
                    .partial_cmp(&scores[lhs])
                    .unwrap_or(Ordering::Equal)
            });

            let mut kept: Vec<usize> = vec![];
            for index in indexes {
                let suppressed = kept
                    .iter()
                    .any(|&other| rects[index].iou_with(&rects[other]) >= iou_threshold);
                if !suppressed {
                    kept.push(index);
                }
            }
            kept
        })
        .collect();

    Ok(keep)
}

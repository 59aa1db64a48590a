use crate::common::*;

/// Pairwise IoU of `[M, 4]` and `[N, 4]` boxes in `(cy, cx, h, w)` form, shaped `[M, N]`.
pub fn pairwise_iou(lhs: &Tensor, rhs: &Tensor) -> Tensor {
    let corners = |boxes: &Tensor| {
        let cy = boxes.select(1, 0);
        let cx = boxes.select(1, 1);
        let h = boxes.select(1, 2);
        let w = boxes.select(1, 3);
        let t = &cy - &h / 2.0;
        let b = &cy + &h / 2.0;
        let l = &cx - &w / 2.0;
        let r = &cx + &w / 2.0;
        let area = &h * &w;
        (t, l, b, r, area)
    };

    let (lt, ll, lb, lr, larea) = corners(lhs);
    let (rt, rl, rb, rr, rarea) = corners(rhs);
    let (lt, ll, lb, lr, larea) = (
        lt.unsqueeze(1),
        ll.unsqueeze(1),
        lb.unsqueeze(1),
        lr.unsqueeze(1),
        larea.unsqueeze(1),
    );
    let (rt, rl, rb, rr, rarea) = (
        rt.unsqueeze(0),
        rl.unsqueeze(0),
        rb.unsqueeze(0),
        rr.unsqueeze(0),
        rarea.unsqueeze(0),
    );

    let inter_h = (lb.minimum(&rb) - lt.maximum(&rt)).relu();
    let inter_w = (lr.minimum(&rr) - ll.maximum(&rl)).relu();
    let inter = inter_h * inter_w;
    let union = larea + rarea - &inter;

    inter / (union + 1e-8)
}

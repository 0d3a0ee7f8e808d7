//! Overlap measures between rectangles.

use common::plates::Rectangle;

/// Area shared by two rectangles, `0` when they do not overlap.
pub fn intersection(a: &Rectangle, b: &Rectangle) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
}

/// Area covered by either rectangle, from the stored areas.
pub fn union(a: &Rectangle, b: &Rectangle) -> f32 {
    a.area + b.area - intersection(a, b)
}

/// Intersection over Union; `0` when the union area is `0`.
pub fn iou(a: &Rectangle, b: &Rectangle) -> f32 {
    let intersection = intersection(a, b);
    let union = a.area + b.area - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection_and_union() {
        let a = Rectangle::new(0.0, 0.0, 10.0, 10.0);
        let b = Rectangle::new(5.0, 5.0, 15.0, 15.0);

        assert_eq!(intersection(&a, &b), 25.0);
        assert_eq!(union(&a, &b), 175.0);
    }

    #[test]
    fn test_calculate_iou() {
        let a = Rectangle::new(10.0, 10.0, 60.0, 30.0);
        let b = Rectangle::new(30.0, 15.0, 80.0, 35.0);

        let overlap = iou(&a, &b);
        assert!(overlap > 0.0 && overlap < 1.0);

        // Identical boxes
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);

        // Non-overlapping boxes
        let far = Rectangle::new(100.0, 100.0, 150.0, 120.0);
        assert_eq!(iou(&a, &far), 0.0);

        // Touching edges share no area
        let touching = Rectangle::new(60.0, 10.0, 90.0, 30.0);
        assert_eq!(iou(&a, &touching), 0.0);
    }

    #[test]
    fn test_iou_zero_union() {
        let point = Rectangle::new(4.0, 4.0, 4.0, 4.0);
        assert_eq!(iou(&point, &point), 0.0);
    }

    #[test]
    fn test_iou_symmetric() {
        let a = Rectangle::new(0.0, 0.0, 12.0, 8.0);
        let b = Rectangle::new(3.0, 2.0, 20.0, 9.0);
        assert_eq!(iou(&a, &b), iou(&b, &a));
    }
}

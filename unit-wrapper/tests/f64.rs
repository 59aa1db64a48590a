use approx::assert_abs_diff_eq;
use unit_wrapper::unit_wrapper;

unit_wrapper!(Pixel);
unit_wrapper!(pub Grid);

#[test]
fn arithmetic_stays_in_space() {
    let zero: Pixel<f64> = Pixel(2.0) * Pixel(3.0) - Pixel(6.0);
    assert_abs_diff_eq!(zero.into_inner(), 0.0);

    let half: Grid<f64> = Grid(1.0) / Grid(2.0);
    assert_abs_diff_eq!(*half, 0.5);
}

#[test]
fn map_rewraps_inner_value() {
    let stride = 16.0;
    let cell = Pixel(208.0).map(|value: f64| value / stride);
    assert_abs_diff_eq!(cell.0, 13.0);
    assert_eq!(Pixel((3, 4)).as_ref().map(|&(a, b)| a + b), Pixel(7));
}

//! Small styled-summary helpers, printed ahead of the progress bar in each
//! subcommand so a user scrolling back through a run sees what ran.

use console::Style;

struct Styles {
    title: Style,
    label: Style,
    value: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
        }
    }
}

pub fn print_projector_summary(
    frames_dir: &std::path::Path,
    output_dim: usize,
    patch_size: usize,
    n_patches: usize,
    gaussian: bool,
) {
    let s = Styles::new();
    println!();
    println!("  {}", s.title.apply_to("Projector Fit"));
    println!("  {:<16}{}", s.label.apply_to("Frames"), s.value.apply_to(frames_dir.display()));
    println!("  {:<16}{}", s.label.apply_to("Output dim"), s.value.apply_to(output_dim));
    println!("  {:<16}{}", s.label.apply_to("Patch size"), s.value.apply_to(format!("{patch_size}x{patch_size}")));
    println!("  {:<16}{}", s.label.apply_to("Training set"), s.value.apply_to(n_patches));
    println!(
        "  {:<16}{}",
        s.label.apply_to("Weighting"),
        s.value.apply_to(if gaussian { "gaussian" } else { "uniform" })
    );
    println!();
}

pub fn print_kdtree_summary(frames_dir: &std::path::Path, start: usize, end: usize, pixel_step: usize, workers: usize) {
    let s = Styles::new();
    println!();
    println!("  {}", s.title.apply_to("Frame Index Build"));
    println!("  {:<16}{}", s.label.apply_to("Frames"), s.value.apply_to(frames_dir.display()));
    println!("  {:<16}{}", s.label.apply_to("Range"), s.value.apply_to(format!("{start}..={end}")));
    println!("  {:<16}{}", s.label.apply_to("Pixel step"), s.value.apply_to(pixel_step));
    println!("  {:<16}{}", s.label.apply_to("Workers"), s.value.apply_to(workers));
    println!();
}

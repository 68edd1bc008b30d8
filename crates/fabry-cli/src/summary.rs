use console::Style;
use fabry_core::pipeline::{PipelineConfig, PipelineOutput, PipelineStatus};
use fabry_core::registry::Slot;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    warning: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            warning: Style::new().yellow(),
        }
    }
}

pub fn print_config_summary(config: &PipelineConfig) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Fabry-Perot Phase Map"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(21)));
    println!();

    println!("  {}", s.header.apply_to("Wavelengths"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Calibration"),
        s.value.apply_to(format!("{} A", config.calibration_wavelength))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Scanning"),
        s.value.apply_to(format!("{} A", config.scanning_wavelength))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("FSR"),
        s.value.apply_to(format!("{} A", config.free_spectral_range))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Order"),
        s.value.apply_to(format!(
            "{} at {} A",
            config.interference_order, config.interference_reference_wavelength
        ))
    );
    println!();

    println!("  {}", s.header.apply_to("Algorithms"));
    for slot in Slot::ALL {
        println!(
            "    {:<22}{}",
            s.label.apply_to(slot.key()),
            s.method.apply_to(config.algorithms.selected(slot))
        );
    }
    println!();

    if config.dont_fit {
        println!(
            "  {:<14}{}",
            s.header.apply_to("Fits"),
            s.disabled.apply_to("disabled")
        );
    } else {
        println!(
            "  {:<14}{}",
            s.header.apply_to("Fits"),
            s.value.apply_to(format!("finesse {} / {} iterations", config.finesse, config.max_fit_iterations))
        );
    }
    println!();
}

pub fn print_run_summary(output: &PipelineOutput) {
    let s = Styles::new();

    println!();
    println!("  {}", s.header.apply_to("Result"));
    let status = match output.status {
        PipelineStatus::Complete => s.method.apply_to("complete"),
        PipelineStatus::UnwrappedOnly => s.method.apply_to("unwrapped only"),
        PipelineStatus::CenterVerificationFailed => s.warning.apply_to("center verification failed"),
        PipelineStatus::InvalidInput => s.warning.apply_to("invalid input"),
        PipelineStatus::Failed => s.warning.apply_to("failed"),
    };
    println!("    {:<14}{}", s.label.apply_to("Status"), status);

    if let Some(rings) = &output.rings {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Center"),
            s.value.apply_to(rings.center)
        );
        println!(
            "    {:<14}{}",
            s.label.apply_to("Radii"),
            s.value.apply_to(format!("{:.1?}", rings.radii))
        );
    }
    if let Some(airy) = &output.airy {
        let reference = airy.reference();
        println!(
            "    {:<14}{}",
            s.label.apply_to("Finesse"),
            s.value.apply_to(format!("{:.2}", reference.finesse))
        );
        println!(
            "    {:<14}{}",
            s.label.apply_to("Channel gap"),
            s.value.apply_to(format!("{:.6} um", airy.channel_gap))
        );
    }
    if let Some(focal) = output.focal_length_um {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Focal length"),
            s.value.apply_to(format!("{:.1} mm", focal / 1000.0))
        );
    }
    if let Some(parabola) = &output.parabola {
        let c = &parabola.coefficients;
        println!(
            "    {:<14}{}",
            s.label.apply_to("Paraboloid"),
            s.value.apply_to(format!(
                "{:.4} {:+.4}x {:+.4}y {:+.6}x2 {:+.6}y2 (rms {:.3})",
                c.a, c.b, c.c, c.d, c.e, parabola.rms
            ))
        );
    }
    if let Some(report) = &output.calibration {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Calibration"),
            s.value.apply_to(format!(
                "{:?}, offset {:+.3} channels",
                report.mode,
                report.offset()
            ))
        );
    }
    println!(
        "    {:<14}{}",
        s.label.apply_to("Elapsed"),
        s.value.apply_to(format!("{:.2} s", output.elapsed.as_secs_f64()))
    );

    if !output.diagnostics.is_empty() {
        println!();
        println!("  {}", s.header.apply_to("Diagnostics"));
        for (i, diagnostic) in output.diagnostics.iter().enumerate() {
            println!(
                "    {}. {}",
                s.label.apply_to(i + 1),
                s.warning.apply_to(diagnostic)
            );
        }
    }
    println!();
}

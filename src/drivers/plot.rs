use std::io::Cursor;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::coord::Shift;
use plotters::prelude::LineSeries;
use plotters::prelude::*;
use crate::config::PlotConfig;
use crate::drivers::compose::{ComposedDischarge, ProbeAnalysis};
use crate::drivers::spectral::{LineTracks, Spectrogram};
use crate::drivers::{AnalysisError, ChannelSeries, TimeWindow};
type Panel<'a> = DrawingArea<BitMapBackend<'a>, Shift>;
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub palette: Vec<RGBColor>,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 900,
            background: RGBColor(10, 10, 10),
            palette: vec![BLUE, RED, GREEN, CYAN, MAGENTA, YELLOW, WHITE],
        }
    }
}
impl From<PlotConfig> for PlotStyle {
    fn from(config: PlotConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            ..Self::default()
        }
    }
}
#[derive(Clone, Debug)]
struct Trace {
    label: String,
    points: Vec<(f64, f64)>,
}
impl Trace {
    fn of(series: &ChannelSeries) -> Self {
        Self {
            label: format!("{} [{}]", series.label, series.unit),
            points: series.points().collect(),
        }
    }
    /// Samples inside `window`, plus interpolated end points where the series
    /// runs past an edge, so sparse records still cross the whole window.
    fn windowed(series: &ChannelSeries, window: &TimeWindow) -> Self {
        let mut points = Vec::new();
        if let Some(span) = series.span() {
            let edge = |t: f64| series.interpolate(t).map(|v| (t, v));
            if span.t0 < window.t0 && span.t1 >= window.t0 {
                points.extend(edge(window.t0));
            }
            points.extend(series.points().filter(|(t, _)| window.contains(*t)));
            if span.t1 > window.t1 && span.t0 <= window.t1 {
                points.extend(edge(window.t1));
            }
            points.dedup_by(|a, b| a.0 == b.0);
        }
        Self {
            label: format!("{} [{}]", series.label, series.unit),
            points,
        }
    }
}
struct PanelSpec {
    caption: String,
    x_label: &'static str,
    /// Fixed x axis; fitted to the data when `None`.
    x_range: Option<TimeWindow>,
    traces: Vec<Trace>,
}
impl PanelSpec {
    fn new(caption: impl Into<String>, x_label: &'static str, traces: Vec<Trace>) -> Self {
        Self {
            caption: caption.into(),
            x_label,
            x_range: None,
            traces,
        }
    }
    fn over(mut self, window: TimeWindow) -> Self {
        self.x_range = Some(window);
        self
    }
}
fn bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if lo > hi {
        return None;
    }
    let pad = if hi - lo < f64::EPSILON {
        lo.abs().max(1.0) * 0.05
    } else {
        (hi - lo) * 0.05
    };
    Some((lo - pad, hi + pad))
}
fn panel_bounds(spec: &PanelSpec) -> Option<((f64, f64), (f64, f64))> {
    let points = || spec.traces.iter().flat_map(|t| t.points.iter());
    let x = match spec.x_range {
        Some(w) if w.duration() > f64::EPSILON => (w.t0, w.t1),
        Some(w) => bounds([w.t0, w.t1].into_iter())?,
        None => bounds(points().map(|p| p.0))?,
    };
    let y = bounds(points().map(|p| p.1))?;
    Some((x, y))
}
fn draw_panel(area: &Panel<'_>, spec: &PanelSpec, style: &PlotStyle) -> Result<(), AnalysisError> {
    let Some((x, y)) = panel_bounds(spec) else {
        area.titled(
            &format!("{} (no data)", spec.caption),
            ("sans-serif", 16).into_font().color(&WHITE),
        )?;
        return Ok(());
    };
    let mut chart = ChartBuilder::on(area)
        .margin(8)
        .caption(&spec.caption, ("sans-serif", 16).into_font().color(&WHITE))
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 35)
        .build_cartesian_2d(x.0..x.1, y.0..y.1)?;
    chart
        .configure_mesh()
        .x_desc(spec.x_label)
        .axis_desc_style(("sans-serif", 12).into_font().color(&WHITE))
        .label_style(("sans-serif", 11).into_font().color(&WHITE))
        .light_line_style(&WHITE.mix(0.1))
        .draw()?;
    for (idx, trace) in spec.traces.iter().enumerate() {
        let color = style.palette[idx % style.palette.len()];
        chart
            .draw_series(LineSeries::new(trace.points.iter().copied(), &color))?
            .label(trace.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }
    if spec.traces.len() > 1 {
        chart
            .configure_series_labels()
            .label_font(("sans-serif", 11).into_font().color(&WHITE))
            .border_style(&WHITE.mix(0.2))
            .background_style(&style.background)
            .draw()?;
    }
    Ok(())
}
/// Cell boundaries around each sample of a sorted axis.
fn cell_edges(axis: &[f64]) -> Vec<f64> {
    match axis {
        [] => Vec::new(),
        [only] => vec![only - 0.5, only + 0.5],
        _ => {
            let n = axis.len();
            let mut edges = Vec::with_capacity(n + 1);
            edges.push(axis[0] - 0.5 * (axis[1] - axis[0]));
            edges.extend(axis.windows(2).map(|w| 0.5 * (w[0] + w[1])));
            edges.push(axis[n - 1] + 0.5 * (axis[n - 1] - axis[n - 2]));
            edges
        }
    }
}
/// Dark purple through red to yellow, `level` in [0, 1].
fn heat_color(level: f64) -> HSLColor {
    if !level.is_finite() {
        return HSLColor(0.0, 0.0, 0.0);
    }
    let level = level.clamp(0.0, 1.0);
    HSLColor((0.78 + 0.38 * level).fract(), 0.9, 0.08 + 0.55 * level)
}
/// Time × wavelength intensity map with the sliced time marked.
fn draw_heatmap(
    area: &Panel<'_>,
    spectrogram: &Spectrogram,
    slice_index: usize,
    style: &PlotStyle,
) -> Result<(), AnalysisError> {
    let time_edges = cell_edges(spectrogram.time());
    let wl_edges = cell_edges(spectrogram.wavelengths());
    let (Some(&t0), Some(&t1), Some(&w0), Some(&w1)) = (
        time_edges.first(),
        time_edges.last(),
        wl_edges.first(),
        wl_edges.last(),
    ) else {
        return Ok(());
    };
    let intensities = spectrogram.intensities();
    let (lo, hi) = bounds(intensities.iter().copied()).unwrap_or((0.0, 1.0));
    let mut chart = ChartBuilder::on(area)
        .margin(8)
        .caption("spectrogram", ("sans-serif", 16).into_font().color(&WHITE))
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 35)
        .build_cartesian_2d(t0..t1, w0..w1)?;
    chart
        .configure_mesh()
        .x_desc("time [s]")
        .y_desc("wavelength [nm]")
        .axis_desc_style(("sans-serif", 12).into_font().color(&WHITE))
        .label_style(("sans-serif", 11).into_font().color(&WHITE))
        .disable_mesh()
        .draw()?;
    // one cell per output pixel column at most
    let (rows, cols) = intensities.dim();
    let stride = cols.div_ceil(style.width.max(1) as usize).max(1);
    let (time_edges, wl_edges) = (&time_edges, &wl_edges);
    let cells = (0..rows).flat_map(|r| {
        (0..cols).step_by(stride).map(move |c| {
            let end = (c + stride).min(cols);
            let level = (intensities[[r, c]] - lo) / (hi - lo);
            Rectangle::new(
                [(time_edges[r], wl_edges[c]), (time_edges[r + 1], wl_edges[end])],
                heat_color(level).filled(),
            )
        })
    });
    chart.draw_series(cells)?;
    let t_slice = spectrogram.time()[slice_index];
    chart.draw_series(LineSeries::new(
        vec![(t_slice, w0), (t_slice, w1)],
        RED.stroke_width(2),
    ))?;
    Ok(())
}
/// One image of `rows` stacked panels drawn by `draw`.
fn render_rows(
    rows: usize,
    style: &PlotStyle,
    draw: impl FnOnce(&[Panel<'_>]) -> Result<(), AnalysisError>,
) -> Result<Vec<u8>, AnalysisError> {
    if rows == 0 {
        return Err(AnalysisError::Plot("nothing to draw".into()));
    }
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        draw(&root.split_evenly((rows, 1)))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
fn render_panels(panels: &[PanelSpec], style: &PlotStyle) -> Result<Vec<u8>, AnalysisError> {
    render_rows(panels.len(), style, |areas| {
        areas
            .iter()
            .zip(panels)
            .try_for_each(|(area, spec)| draw_panel(area, spec, style))
    })
}
/// Acquisition-card channels as recorded, against the shared time axis.
pub fn render_raw_png(probe: &ProbeAnalysis, style: &PlotStyle) -> Result<Vec<u8>, AnalysisError> {
    let time = probe.voltage.time();
    let mut panels = vec![PanelSpec::new(
        "sample time",
        "sample",
        vec![Trace {
            label: "time [s]".into(),
            points: time.iter().enumerate().map(|(i, &t)| (i as f64, t)).collect(),
        }],
    )];
    panels.extend(
        probe
            .raw
            .iter()
            .map(|s| PanelSpec::new(s.label.clone(), "time [s]", vec![Trace::of(s)])),
    );
    render_panels(&panels, style)
}
/// Probe voltage and current over the fit window, and the IV curve with the
/// fitted model.
pub fn render_iv_png(probe: &ProbeAnalysis, style: &PlotStyle) -> Result<Vec<u8>, AnalysisError> {
    if probe.cropped_voltage.is_empty() {
        return Err(AnalysisError::Plot("fit window holds no probe samples".into()));
    }
    let with_smoothed = |raw: &ChannelSeries, smooth: &Option<ChannelSeries>| {
        let mut traces = vec![Trace::of(raw)];
        if let Some(s) = smooth {
            traces.push(Trace {
                label: format!("{} smoothed", s.label),
                points: s.points().collect(),
            });
        }
        traces
    };
    let mut iv = vec![Trace {
        label: "measured".into(),
        points: probe
            .cropped_voltage
            .values()
            .iter()
            .copied()
            .zip(probe.cropped_current.values().iter().copied())
            .collect(),
    }];
    if let (Some(v), Some(i)) = (&probe.smoothed_voltage, &probe.smoothed_current) {
        iv.push(Trace {
            label: "smoothed".into(),
            points: v.values().iter().copied().zip(i.values().iter().copied()).collect(),
        });
    }
    if let Ok(fit) = &probe.fit {
        let mut sweep = probe.cropped_voltage.values().to_vec();
        sweep.sort_by(f64::total_cmp);
        let current = fit.evaluate(&sweep);
        iv.push(Trace {
            label: format!(
                "fit Te={:.2} eV Isat={:.3} mA",
                fit.parameters.te, fit.parameters.isat
            ),
            points: sweep.into_iter().zip(current).collect(),
        });
    }
    let panels = [
        PanelSpec::new(
            "probe voltage",
            "time [s]",
            with_smoothed(&probe.cropped_voltage, &probe.smoothed_voltage),
        ),
        PanelSpec::new(
            "probe current",
            "time [s]",
            with_smoothed(&probe.cropped_current, &probe.smoothed_current),
        ),
        PanelSpec::new("IV characteristic", "voltage [V]", iv),
    ];
    render_panels(&panels, style)
}
/// Every present instrument on the shared axis, limited to the span where
/// they all have data.
pub fn render_time_png(
    discharge: &ComposedDischarge,
    tracks: &LineTracks,
    style: &PlotStyle,
) -> Result<Vec<u8>, AnalysisError> {
    let window = discharge.valid_span;
    let traces = |series: &[&ChannelSeries]| -> Vec<Trace> {
        series.iter().map(|s| Trace::windowed(s, &window)).collect()
    };
    let mut panels = Vec::new();
    if !tracks.is_empty() {
        let lines: Vec<&ChannelSeries> = tracks.iter().map(|t| &t.series).collect();
        panels.push(PanelSpec::new("emission lines", "time [s]", traces(&lines)).over(window));
    }
    if !discharge.rf.is_empty() {
        let mut rf = Vec::new();
        for (instrument, log) in &discharge.rf {
            for mut trace in traces(&log.series()) {
                trace.label = format!("{instrument} {}", trace.label);
                rf.push(trace);
            }
        }
        if let Some(total) = &discharge.rf_total {
            rf.extend(traces(&total.series()));
        }
        panels.push(PanelSpec::new("RF power", "time [s]", rf).over(window));
    }
    if let Some(probe) = &discharge.probe {
        panels.push(
            PanelSpec::new(
                "pressure",
                "time [s]",
                traces(&[&probe.pressure_raw, &probe.pressure_h2]),
            )
            .over(window),
        );
        panels.push(
            PanelSpec::new("probe voltage", "time [s]", traces(&[&probe.voltage])).over(window),
        );
        panels.push(
            PanelSpec::new("probe current", "time [s]", traces(&[&probe.current])).over(window),
        );
    }
    render_panels(&panels, style)
}
/// Intensity map, tracked line intensities over time and one full spectrum.
/// An out of range `slice_index` shows the last spectrum.
pub fn render_spectra_png(
    spectrogram: &Spectrogram,
    tracks: &LineTracks,
    slice_index: usize,
    style: &PlotStyle,
) -> Result<Vec<u8>, AnalysisError> {
    let count = spectrogram.spectrum_count();
    if count == 0 {
        return Err(AnalysisError::Plot("spectrogram has no spectra".into()));
    }
    let index = slice_index.min(count - 1);
    let spectrum = spectrogram.spectrum_at(index).unwrap_or_default();
    let panels = [
        PanelSpec::new(
            "line intensity",
            "time [s]",
            tracks
                .iter()
                .map(|t| Trace {
                    label: format!("{:.2} nm", t.sampled_wavelength),
                    points: t.series.points().collect(),
                })
                .collect(),
        ),
        PanelSpec::new(
            format!("spectrum at t = {:.3} s", spectrogram.time()[index]),
            "wavelength [nm]",
            vec![Trace {
                label: "counts".into(),
                points: spectrum,
            }],
        ),
    ];
    render_rows(panels.len() + 1, style, |areas| {
        draw_heatmap(&areas[0], spectrogram, index, style)?;
        areas[1..]
            .iter()
            .zip(&panels)
            .try_for_each(|(area, spec)| draw_panel(area, spec, style))
    })
}
fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, AnalysisError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| AnalysisError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}

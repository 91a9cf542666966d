//! Chart data, slide-deck assembly and export.
//!
//! Rendering and file encoding sit behind [`ChartRenderer`] and
//! [`DeckEncoder`]. A chart that fails to render becomes a placeholder
//! notice on its slide instead of failing the export.

use crate::error::{Result, RevfluxError};
use crate::schema::{DatasetId, ForecastResult, TailLengthBounds, TimeSeries};
use crate::utils::{format_month_year, format_rupiah};
use chrono::NaiveDate;
use log::{info, warn};
use serde::{Deserialize, Serialize};

pub const PRESENTATION_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

pub const REPORT_TITLE: &str = "Laporan Prediksi Pemasukan";

const SUMMARY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesTag {
    Actual,
    Forecast,
}

impl SeriesTag {
    pub fn label(&self) -> &'static str {
        match self {
            SeriesTag::Actual => "Aktual",
            SeriesTag::Forecast => "Prediksi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub period: NaiveDate,
    pub value: f64,
    pub tag: SeriesTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandPoint {
    pub period: NaiveDate,
    pub forecast: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChartSpec {
    /// History followed by the forecast, tagged per point.
    ActualVsForecast { points: Vec<ChartPoint> },
    ConfidenceBand {
        history: Vec<ChartPoint>,
        band: Vec<BandPoint>,
    },
    /// Last `tail_length` points of history and forecast combined.
    MonthlyComparison {
        tail_length: usize,
        bars: Vec<ChartPoint>,
    },
}

fn combined_points(history: &TimeSeries, forecast: &ForecastResult) -> Vec<ChartPoint> {
    let actual = history.points().iter().map(|p| ChartPoint {
        period: p.period,
        value: p.value,
        tag: SeriesTag::Actual,
    });
    let predicted = forecast
        .periods
        .iter()
        .zip(&forecast.point_forecast)
        .map(|(&period, &value)| ChartPoint {
            period,
            value,
            tag: SeriesTag::Forecast,
        });
    actual.chain(predicted).collect()
}

impl ChartSpec {
    pub fn actual_vs_forecast(history: &TimeSeries, forecast: &ForecastResult) -> Self {
        ChartSpec::ActualVsForecast {
            points: combined_points(history, forecast),
        }
    }

    pub fn confidence_band(history: &TimeSeries, forecast: &ForecastResult) -> Self {
        let history = history
            .points()
            .iter()
            .map(|p| ChartPoint {
                period: p.period,
                value: p.value,
                tag: SeriesTag::Actual,
            })
            .collect();
        let band = forecast
            .rows()
            .map(|(period, forecast, lower, upper)| BandPoint {
                period,
                forecast,
                lower,
                upper,
            })
            .collect();
        ChartSpec::ConfidenceBand { history, band }
    }

    pub fn monthly_comparison(
        history: &TimeSeries,
        forecast: &ForecastResult,
        tail_length: usize,
        bounds: &TailLengthBounds,
    ) -> Result<Self> {
        if !(bounds.min..=bounds.max).contains(&tail_length) {
            return Err(RevfluxError::InvalidTailLength {
                length: tail_length,
                min: bounds.min,
                max: bounds.max,
            });
        }

        let combined = combined_points(history, forecast);
        let skip = combined.len().saturating_sub(tail_length);
        Ok(ChartSpec::MonthlyComparison {
            tail_length,
            bars: combined[skip..].to_vec(),
        })
    }

    pub fn title(&self) -> String {
        match self {
            ChartSpec::ActualVsForecast { .. } => "Grafik Aktual vs Prediksi".to_string(),
            ChartSpec::ConfidenceBand { .. } => "Grafik Rentang Keyakinan Prediksi".to_string(),
            ChartSpec::MonthlyComparison { .. } => "Grafik Perbandingan Bulanan".to_string(),
        }
    }

    /// Smallest and largest value drawn, bounds included.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let values: Vec<f64> = match self {
            ChartSpec::ActualVsForecast { points } => points.iter().map(|p| p.value).collect(),
            ChartSpec::MonthlyComparison { bars, .. } => bars.iter().map(|p| p.value).collect(),
            ChartSpec::ConfidenceBand { history, band } => history
                .iter()
                .map(|p| p.value)
                .chain(band.iter().flat_map(|b| [b.forecast, b.lower, b.upper]))
                .collect(),
        };
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        (min.is_finite() && max.is_finite()).then_some((min, max))
    }
}

/// RGB8 pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub trait ChartRenderer {
    fn render(&self, chart: &ChartSpec) -> Result<RasterImage>;
}

/// Renderer for environments without a drawing backend; every chart becomes
/// a placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableRenderer;

impl ChartRenderer for UnavailableRenderer {
    fn render(&self, chart: &ChartSpec) -> Result<RasterImage> {
        Err(RevfluxError::Render(format!(
            "no chart renderer available for '{}'",
            chart.title()
        )))
    }
}

#[cfg(feature = "charts")]
pub use self::plotters_renderer::PlottersRenderer;

#[cfg(feature = "charts")]
mod plotters_renderer {
    use super::{ChartRenderer, ChartSpec, RasterImage, SeriesTag};
    use crate::error::{Result, RevfluxError};
    use plotters::prelude::*;

    const ACTUAL_COLOR: RGBColor = RGBColor(0x34, 0x98, 0xdb);
    const FORECAST_COLOR: RGBColor = RGBColor(0xe7, 0x4c, 0x3c);

    #[derive(Debug, Clone, Copy)]
    pub struct PlottersRenderer {
        pub width: u32,
        pub height: u32,
    }

    impl Default for PlottersRenderer {
        fn default() -> Self {
            Self {
                width: 1000,
                height: 500,
            }
        }
    }

    fn render_error<E: std::fmt::Display>(e: E) -> RevfluxError {
        RevfluxError::Render(e.to_string())
    }

    fn tag_color(tag: SeriesTag) -> RGBColor {
        match tag {
            SeriesTag::Actual => ACTUAL_COLOR,
            SeriesTag::Forecast => FORECAST_COLOR,
        }
    }

    impl PlottersRenderer {
        fn draw(&self, chart: &ChartSpec, buffer: &mut [u8]) -> Result<()> {
            let (y_min, y_max) = chart
                .value_range()
                .ok_or_else(|| RevfluxError::Render("chart has no data".to_string()))?;
            let y_margin = ((y_max - y_min) * 0.05).max(1.0);

            let count = match chart {
                ChartSpec::ActualVsForecast { points } => points.len(),
                ChartSpec::MonthlyComparison { bars, .. } => bars.len(),
                ChartSpec::ConfidenceBand { history, band } => history.len() + band.len(),
            };
            let x_max = count.max(2) as f64;

            let root = BitMapBackend::with_buffer(buffer, (self.width, self.height))
                .into_drawing_area();
            root.fill(&WHITE).map_err(render_error)?;

            let mut builder = ChartBuilder::on(&root)
                .caption(chart.title(), ("sans-serif", 24).into_font())
                .margin(10)
                .x_label_area_size(30)
                .y_label_area_size(60)
                .build_cartesian_2d(-0.5..x_max - 0.5, (y_min - y_margin)..(y_max + y_margin))
                .map_err(render_error)?;

            builder.configure_mesh().draw().map_err(render_error)?;

            match chart {
                ChartSpec::ActualVsForecast { points } => {
                    for tag in [SeriesTag::Actual, SeriesTag::Forecast] {
                        let series: Vec<(f64, f64)> = points
                            .iter()
                            .enumerate()
                            .filter(|(_, p)| p.tag == tag)
                            .map(|(i, p)| (i as f64, p.value))
                            .collect();
                        builder
                            .draw_series(LineSeries::new(series, tag_color(tag)))
                            .map_err(render_error)?;
                    }
                }
                ChartSpec::ConfidenceBand { history, band } => {
                    let offset = history.len();
                    let actual: Vec<(f64, f64)> =
                        history.iter().enumerate().map(|(i, p)| (i as f64, p.value)).collect();
                    builder
                        .draw_series(LineSeries::new(actual, ACTUAL_COLOR))
                        .map_err(render_error)?;

                    let at = |i: usize| (offset + i) as f64;
                    let lines: [(Vec<(f64, f64)>, RGBColor); 3] = [
                        (band.iter().enumerate().map(|(i, b)| (at(i), b.forecast)).collect(), FORECAST_COLOR),
                        (band.iter().enumerate().map(|(i, b)| (at(i), b.upper)).collect(), GREEN),
                        (band.iter().enumerate().map(|(i, b)| (at(i), b.lower)).collect(), YELLOW),
                    ];
                    for (series, color) in lines {
                        builder
                            .draw_series(LineSeries::new(series, color))
                            .map_err(render_error)?;
                    }
                }
                ChartSpec::MonthlyComparison { bars, .. } => {
                    let baseline = y_min.min(0.0);
                    builder
                        .draw_series(bars.iter().enumerate().map(|(i, p)| {
                            let x = i as f64;
                            Rectangle::new(
                                [(x - 0.4, baseline), (x + 0.4, p.value)],
                                tag_color(p.tag).filled(),
                            )
                        }))
                        .map_err(render_error)?;
                }
            }

            root.present().map_err(render_error)?;
            Ok(())
        }
    }

    impl ChartRenderer for PlottersRenderer {
        fn render(&self, chart: &ChartSpec) -> Result<RasterImage> {
            let mut pixels = vec![0u8; self.width as usize * self.height as usize * 3];
            self.draw(chart, &mut pixels)?;
            Ok(RasterImage {
                width: self.width,
                height: self.height,
                pixels,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChartVisual {
    Image(RasterImage),
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Slide {
    Title {
        title: String,
        lines: Vec<String>,
    },
    Summary {
        title: String,
        heading: String,
        lines: Vec<String>,
    },
    Chart {
        title: String,
        visual: ChartVisual,
    },
    Closing {
        title: String,
        lines: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideDeck {
    pub dataset: DatasetId,
    pub slides: Vec<Slide>,
}

impl SlideDeck {
    /// Assembles the report for `history` and its forecast. Fails only on an
    /// invalid tail length or an empty history; chart failures become
    /// placeholders.
    pub fn build(
        dataset: &DatasetId,
        history: &TimeSeries,
        forecast: &ForecastResult,
        tail_length: usize,
        bounds: &TailLengthBounds,
        renderer: &dyn ChartRenderer,
    ) -> Result<Self> {
        let (first, last) = match (history.first_period(), history.last_period()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(RevfluxError::InvalidSeries("cannot report on an empty history".to_string())),
        };

        let charts = [
            ChartSpec::actual_vs_forecast(history, forecast),
            ChartSpec::confidence_band(history, forecast),
            ChartSpec::monthly_comparison(history, forecast, tail_length, bounds)?,
        ];

        let mut slides = vec![
            Slide::Title {
                title: REPORT_TITLE.to_string(),
                lines: vec![
                    format!("Dataset: {}", dataset),
                    format!(
                        "Periode Data Aktual: {} - {}",
                        format_month_year(first),
                        format_month_year(last)
                    ),
                    format!("Periode Prediksi: {} bulan ke depan", forecast.len()),
                ],
            },
            Slide::Summary {
                title: "Ringkasan Prediksi".to_string(),
                heading: "Tabel Prediksi (1 baris per periode):".to_string(),
                lines: forecast
                    .periods
                    .iter()
                    .zip(&forecast.point_forecast)
                    .take(SUMMARY_LIMIT)
                    .map(|(&period, &value)| {
                        format!("{} — {}", format_month_year(period), format_rupiah(value))
                    })
                    .collect(),
            },
        ];

        for chart in &charts {
            let title = chart.title();
            let visual = match renderer.render(chart) {
                Ok(image) => ChartVisual::Image(image),
                Err(e) => {
                    warn!("Chart '{}' not rendered, using placeholder: {}", title, e);
                    ChartVisual::Placeholder(format!("Gambar tidak tersedia untuk '{}'.", title))
                }
            };
            slides.push(Slide::Chart { title, visual });
        }

        slides.push(Slide::Closing {
            title: "Kesimpulan".to_string(),
            lines: vec![
                "Laporan ini berisi prediksi pemasukan berdasarkan model SARIMA.".to_string(),
                "Periksa slide 'Ringkasan Prediksi' untuk tabel singkat dan slide grafik untuk visualisasi."
                    .to_string(),
            ],
        });

        Ok(Self {
            dataset: dataset.clone(),
            slides,
        })
    }

    pub fn placeholder_count(&self) -> usize {
        self.slides
            .iter()
            .filter(|s| matches!(s, Slide::Chart { visual: ChartVisual::Placeholder(_), .. }))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub trait DeckEncoder {
    fn mime_type(&self) -> &str;

    fn extension(&self) -> &str;

    fn encode(&self, deck: &SlideDeck) -> Result<Vec<u8>>;

    fn export(&self, deck: &SlideDeck) -> Result<ExportArtifact> {
        let bytes = self.encode(deck)?;
        let file_name = format!("laporan_prediksi_{}.{}", deck.dataset, self.extension());
        info!("Exported {} ({} bytes)", file_name, bytes.len());
        Ok(ExportArtifact {
            file_name,
            mime_type: self.mime_type().to_string(),
            bytes,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeckEncoder {
    pub pretty: bool,
}

impl DeckEncoder for JsonDeckEncoder {
    fn mime_type(&self) -> &str {
        "application/json"
    }

    fn extension(&self) -> &str {
        "json"
    }

    fn encode(&self, deck: &SlideDeck) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(deck)?
        } else {
            serde_json::to_vec(deck)?
        };
        Ok(bytes)
    }
}

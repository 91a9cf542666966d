use chrono::NaiveDate;
use revflux::sample::{synthetic_history, SyntheticProfile};
use revflux::*;
use std::error::Error;
use std::path::PathBuf;

fn main() -> std::result::Result<(), Box<dyn Error>> {
    println!("🚀 RevFlux Forecast Workflow");
    println!("═══════════════════════════════════════════════════════════════\n");

    // 1. Configuration (optional JSON file as first argument)
    let mut config = match std::env::args().nth(1) {
        Some(path) => RevfluxConfig::from_json_file(path)?,
        None => RevfluxConfig::default(),
    };
    if config.storage_dir == PathBuf::from(".") {
        config.storage_dir = std::env::temp_dir().join("revflux_demo");
    }
    println!("📁 Storage: {}", config.storage_dir.display());
    println!("📐 Model:   {}\n", config.model);

    // 2. Session over a file store, starting clean
    let store = FileStore::from_config(&config)?;
    let estimator = CssSarimaEstimator::new(config.estimator);
    let horizon = config.default_horizon;
    let tail = config.tail_length.default;
    let mut session = SessionContext::open(store, estimator, config)?;
    session.reinitialize()?;

    // 3. Upload three years of history, then a correction for the last month
    let start = NaiveDate::from_ymd_opt(2022, 1, 1).ok_or("invalid start date")?;
    let history = synthetic_history(start, 36, &SyntheticProfile::default(), 2025)?;
    let table = normalizer::points_to_table(history.points(), "Periode", "Pemasukan");
    let summary = session.upload("toko_contoh.csv", &table)?;
    println!(
        "📤 Uploaded {} rows into '{}' ({} - {})",
        summary.rows_accepted,
        summary.dataset,
        summary.first_period.map(format_month_year).unwrap_or_default(),
        summary.last_period.map(format_month_year).unwrap_or_default()
    );

    let correction = RawTable::from_pairs("Periode", "Pemasukan", vec![("December 2024", 21_500_000.0)]);
    let summary = session.upload("koreksi.csv", &correction)?;
    println!(
        "✏️  Correction merged: {} duplicate replaced, {} months stored\n",
        summary.removed_duplicates, summary.total_points
    );

    // 4. Train
    let training = session.train()?;
    println!(
        "🧠 Trained {} on {} months ending {}",
        training.spec,
        training.observations,
        format_month_year(training.last_period)
    );
    for advisory in &training.advisories {
        println!("   ⚠️  {:?}", advisory);
    }
    println!();

    // 5. Forecast
    let forecast = session.forecast(horizon)?;
    println!("📈 Forecast ({}% confidence):", forecast.confidence_level * 100.0);
    for (period, value, lower, upper) in forecast.rows() {
        println!(
            "   {:<15} {:>16}   [{} - {}]",
            format_month_year(period),
            format_rupiah(value),
            format_rupiah(lower),
            format_rupiah(upper)
        );
    }
    println!();

    // 6. Export
    #[cfg(feature = "charts")]
    let renderer = PlottersRenderer::default();
    #[cfg(not(feature = "charts"))]
    let renderer = UnavailableRenderer;

    let artifact = session.export(horizon, tail, &renderer, &JsonDeckEncoder { pretty: true })?;
    let out_path = session.config().storage_dir.join(&artifact.file_name);
    std::fs::write(&out_path, &artifact.bytes)?;
    println!(
        "📦 Exported {} ({}, {} bytes)",
        out_path.display(),
        artifact.mime_type,
        artifact.bytes.len()
    );

    // 7. Reset and restore
    if let Some(id) = session.reset_dataset()? {
        println!("🗑️  Reset '{}' (backup kept)", id);
    }
    let restored = session.restore()?;
    println!("♻️  Restored '{}'", restored);

    println!("\n✅ Done");
    Ok(())
}

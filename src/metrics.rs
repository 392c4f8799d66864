use indexmap::IndexMap;
use std::io::Write;
use std::path::Path;

/// Per-run table of named scalar series sampled by frame id. Stages push
/// whatever they want to account for (tracked rectangle coordinates,
/// per-stage timings); the runner renders the whole sheet to a text
/// report after the source is exhausted.
#[derive(Debug, Default)]
pub struct MetricSheet {
    series: IndexMap<String, Vec<(u64, f32)>>,
}

impl MetricSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, series: &str, frame_id: u64, value: f32) {
        self.series
            .entry(series.to_string())
            .or_default()
            .push((frame_id, value));
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn series_names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn samples(&self, series: &str) -> Option<&[(u64, f32)]> {
        self.series.get(series).map(Vec::as_slice)
    }

    /// One line per sample, grouped by series in recording order.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        for (name, samples) in &self.series {
            out.push_str(name);
            out.push('\n');
            for (frame_id, value) in samples {
                out.push_str(&format!("  {frame_id}\t{value}\n"));
            }
        }
        out
    }

    pub fn write_report(&self, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(self.render_report().as_bytes())
    }
}

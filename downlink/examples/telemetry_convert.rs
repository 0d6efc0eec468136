//! Demonstration of the CSV-to-line-protocol conversion path.
//!
//! Generates a small telemetry export, validates it against a source schema,
//! encodes each row into a measurement entry, and shows that rendered lines
//! parse back to identical entries.
//!
//! Run with: `cargo run -p downlink --example telemetry_convert`

use downlink::{CsvSource, FieldSpec, Layout, SourceSchema, parse_line};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = "./telemetry_demo.csv";

    // Generate a telemetry file shaped like a ground-station export:
    // ECI position in kilometers plus the sub-satellite point in degrees.
    let mut csv = String::from("pos_eci_x,pos_eci_y,pos_eci_z,latitude,longitude,datetime\n");
    for i in 0u32..10 {
        let angle = f64::from(i) * 0.05;
        let seconds = i * 30;
        csv.push_str(&format!(
            "{:.3},{:.3},{:.3},{:.3},{:.3},2021-05-26T12:{:02}:{:02}Z\n",
            6871.0 * angle.cos(),
            6871.0 * angle.sin(),
            120.0 * f64::from(i),
            51.6 * angle.sin(),
            (-60.0 + 4.0 * f64::from(i)).rem_euclid(360.0) - 180.0,
            45 + seconds / 60,
            seconds % 60,
        ));
    }
    std::fs::write(path, &csv)?;
    println!("Wrote 10 sample rows to {path}");

    // Opening validates the header before any row is read
    let schema = SourceSchema::new("datetime")
        .require("pos_eci_x")
        .require("pos_eci_y")
        .require("pos_eci_z")
        .require("latitude")
        .require("longitude");
    let source = CsvSource::open(path, schema)?;
    println!("Header validated: {} columns", source.header().len());

    let layout = Layout::new("coordinates")
        .tag("type", "TELEM")
        .field(FieldSpec::float("pos_eci_x"))
        .field(FieldSpec::float("pos_eci_y"))
        .field(FieldSpec::float("pos_eci_z"))
        .field(FieldSpec::float("latitude"))
        .field(FieldSpec::float("longitude"));

    println!("\nEncoded line protocol:");
    let mut lines = Vec::new();
    for record in source.records()? {
        let line = layout.encode(&record?)?.to_line()?;
        println!("  {line}");
        lines.push(line);
    }

    // Every rendered line parses back to an identical entry
    let entry = parse_line(&lines[0])?;
    println!("\nFirst entry, parsed back:");
    println!("  measurement: {}", entry.measurement());
    println!("  tags:        {:?}", entry.tags());
    println!("  fields:      {} values", entry.fields().len());
    assert_eq!(entry.to_line()?, lines[0]);
    println!("  round trip:  exact");

    std::fs::remove_file(path)?;
    Ok(())
}

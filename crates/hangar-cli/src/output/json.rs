use hangar_core::error::HangarError;
use hangar_core::HangingReport;

pub fn print(report: &HangingReport) -> Result<(), HangarError> {
    let json = serde_json::to_string_pretty(report)?;
    println!("{json}");
    Ok(())
}

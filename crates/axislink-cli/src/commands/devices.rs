//! List audio output devices.

use anyhow::Result;

#[cfg(feature = "audio")]
pub fn run() -> Result<()> {
    let devices = axislink_core::backend::audio::list_audio_devices()?;
    if devices.is_empty() {
        println!("No audio output devices found");
        return Ok(());
    }

    println!("Audio output devices:");
    for name in devices {
        println!("  {}", name);
    }
    Ok(())
}

#[cfg(not(feature = "audio"))]
pub fn run() -> Result<()> {
    anyhow::bail!("this build has no audio support")
}

//! Built-in preset listing.

use anyhow::Result;

use backupd::scheduler::presets;

pub fn run() -> Result<()> {
    for (id, preset) in presets::all()? {
        let types: Vec<&str> = preset.backup_types.iter().map(|t| t.as_str()).collect();
        println!("{id}");
        println!("  name:     {}", preset.name);
        println!("  schedule: {}", preset.recurrence);
        println!("  backups:  {}", types.join(", "));
        if !preset.description.is_empty() {
            println!("  {}", preset.description);
        }
    }
    Ok(())
}

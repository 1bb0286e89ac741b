use authz::ResourceId;
use colored::*;

/// Check a resource id; returns whether it is valid
pub fn execute(raw: &str) -> bool {
    match ResourceId::parse(raw) {
        Ok(id) => {
            println!("{} {}", "valid:".green().bold(), id);
            true
        }
        Err(_) => {
            println!("{} {:?}", "invalid:".red().bold(), raw);
            println!("  Resource ids are 1 to 50 characters of [A-Za-z0-9_-]");
            false
        }
    }
}

use std::path::Path;

use auklet_queue::QueueStat;
use auklet_repair::ManualSummary;

pub fn print_summary(input: &Path, summary: &ManualSummary) {
    println!("manual repair of {} finished", input.display());
    println!("  attempted: {}", summary.attempted);
    println!("  succeeded: {}", summary.succeeded);
    println!("  failed:    {}", summary.failed);
    if summary.skipped_rows > 0 {
        println!("  skipped malformed rows: {}", summary.skipped_rows);
    }
    println!(
        "outcomes written to {}.success / {}.failed",
        input.display(),
        input.display()
    );
}

pub fn print_stats(stats: &[QueueStat]) {
    if stats.is_empty() {
        println!("repair queue is empty");
        return;
    }
    println!(
        "{:>9}  {:>9}  {:>7}  {:>20}  {:>20}  {:>12}  {:>12}",
        "placement", "attempted", "count", "oldest inserted", "latest inserted", "min health", "max health"
    );
    for stat in stats {
        println!(
            "{:>9}  {:>9}  {:>7}  {:>20}  {:>20}  {:>12.3}  {:>12.3}",
            stat.placement,
            stat.attempted,
            stat.count,
            stat.min_inserted_at.format("%Y-%m-%d %H:%M:%S"),
            stat.max_inserted_at.format("%Y-%m-%d %H:%M:%S"),
            stat.min_segment_health,
            stat.max_segment_health,
        );
    }
}

//! Human-readable rendering of search hits and collection stats.

use serde_json::Value;

use tracklist_core::types::SearchHit;
use tracklist_storage::CollectionDescription;

/// Labelled fields of a hit. Absent attributes are left out.
pub fn hit_fields(hit: &SearchHit) -> Vec<(String, String)> {
    let song = &hit.song;
    let mut out = vec![("Episode".to_string(), song.episode_id.clone())];

    let mut text = |label: &str, value: &Option<String>| {
        if let Some(v) = value {
            out.push((label.to_string(), v.clone()));
        }
    };
    text("Artist", &song.artist);
    text("Collaborators", &song.collaborators);
    text("Featured Artists", &song.featured_artists);
    text("Title", &song.title);
    text("Remix", &song.remix_info);

    let mut int = |label: &str, value: Option<i64>| {
        if let Some(v) = value {
            out.push((label.to_string(), v.to_string()));
        }
    };
    int("Ranking", song.ranking);
    int("Popularity Score", song.popularity_score);
    int("Vote Count", song.vote_count);

    if let Some(url) = &song.url {
        out.push(("URL".to_string(), url.clone()));
    }
    for (key, value) in &song.extra {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out.push((key.clone(), rendered));
    }
    out.push(("Match Score".to_string(), format!("{:.4}", hit.score)));
    out
}

pub fn render_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found".to_string();
    }
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("#{}\n", i + 1));
        for (label, value) in hit_fields(hit) {
            out.push_str(&format!("  {}: {}\n", label, value));
        }
    }
    out
}

pub fn render_stats(stats: &CollectionDescription, episodes: &[String]) -> String {
    format!(
        "Collection: {}\nCreated: {}\nTotal Songs: {}\nEpisodes: {}\nEpisode Numbers: {}",
        stats.name,
        stats.created_at.to_rfc3339(),
        stats.row_count,
        episodes.len(),
        episodes.join(", ")
    )
}

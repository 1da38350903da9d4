//! HTML rendering.

use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use myflix_core::catalog::{format_duration, format_file_size, CatalogItem, CatalogSnapshot};
use std::fmt::Write;

const STYLE: &str = "\
body{margin:0;font-family:system-ui,sans-serif;background:#141414;color:#eee}\
header{display:flex;gap:1.5rem;align-items:center;padding:1rem 2rem;background:#000}\
header a{color:#e50914;font-weight:700;font-size:1.5rem;text-decoration:none}\
nav a{color:#ccc;margin-right:.8rem;text-decoration:none}\
main{padding:1rem 2rem}\
.row{display:flex;flex-wrap:wrap;gap:1rem}\
.card{width:200px;background:#222;border-radius:6px;overflow:hidden;color:inherit;text-decoration:none}\
.card img{width:100%;height:112px;object-fit:cover;background:#333}\
.card div{padding:.5rem}\
.meta{color:#999;font-size:.85rem}\
video{width:100%;max-height:75vh;background:#000}";

const SCRIPT: &str = r"
async function searchMovies(e){e.preventDefault();
const q=document.getElementById('q').value.trim();if(!q)return;
const r=await fetch('/api/search?q='+encodeURIComponent(q));const d=await r.json();
const out=document.getElementById('results');out.innerHTML='';
(d.results||[]).forEach(m=>{const a=document.createElement('a');a.href='/watch/'+m.message_id;
a.textContent=m.title+' ('+m.year+')';out.appendChild(a);out.appendChild(document.createElement('br'));});}
async function refreshCatalog(){const r=await fetch('/api/refresh');const d=await r.json();
alert(d.success?d.message+' ('+d.total+' movies)':(d.message||d.error));if(d.success)location.reload();}";

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\
         <title>{} - MyFlix</title><style>{STYLE}</style></head>\
         <body><header><a href=\"/\">MyFlix</a></header><main>{body}</main></body></html>",
        text(title)
    )
}

fn genre_href(genre: &str) -> String {
    format!("/category/{}", urlencoding::encode(genre))
}

fn movie_card(out: &mut String, movie: &CatalogItem) {
    let poster = if movie.thumbnail.is_some() {
        format!("<img src=\"/thumbnail/{}\" alt=\"\" loading=\"lazy\">", movie.message_id)
    } else {
        "<img alt=\"\">".to_string()
    };
    let _ = write!(
        out,
        "<a class=\"card\" href=\"/watch/{id}\">{poster}<div><strong>{title}</strong>\
         <p class=\"meta\">{year} · {duration} · ⭐ {rating}</p></div></a>",
        id = movie.message_id,
        title = text(&movie.title),
        year = text(&movie.year),
        duration = format_duration(movie.duration),
        rating = text(&movie.rating),
    );
}

fn movie_row(out: &mut String, movies: &[&CatalogItem]) {
    out.push_str("<div class=\"row\">");
    for movie in movies {
        movie_card(out, movie);
    }
    out.push_str("</div>");
}

/// Home page: every movie, grouped by genre.
#[must_use]
pub fn index_page(snapshot: &CatalogSnapshot, categories: &[String]) -> String {
    let mut body = String::new();

    body.push_str("<nav>");
    for category in categories {
        let _ = write!(
            body,
            "<a href=\"{}\">{}</a>",
            attr(&genre_href(category)),
            text(category)
        );
    }
    body.push_str("</nav>");

    body.push_str(
        "<form onsubmit=\"searchMovies(event)\"><input id=\"q\" placeholder=\"Search movies\">\
         <button>Search</button> <button type=\"button\" onclick=\"refreshCatalog()\">Refresh\
         </button></form><div id=\"results\"></div>",
    );
    let _ = write!(body, "<p class=\"meta\">{} movies</p>", snapshot.total_movies);

    if snapshot.is_empty() {
        body.push_str(
            "<p>No movies yet. Check the channel configuration and use Refresh once \
             videos are posted.</p>",
        );
    }
    for (genre, movies) in snapshot.group_by_genre() {
        let _ = write!(
            body,
            "<h2><a href=\"{}\" style=\"color:inherit\">{}</a></h2>",
            attr(&genre_href(genre)),
            text(genre)
        );
        movie_row(&mut body, &movies);
    }
    let _ = write!(body, "<script>{SCRIPT}</script>");

    layout("Home", &body)
}

/// Player page for one movie.
#[must_use]
pub fn watch_page(movie: &CatalogItem) -> String {
    let genres: Vec<String> = movie
        .genre
        .iter()
        .map(|g| format!("<a href=\"{}\">{}</a>", attr(&genre_href(g)), text(g)))
        .collect();
    let poster = if movie.thumbnail.is_some() {
        format!(" poster=\"/thumbnail/{}\"", movie.message_id)
    } else {
        String::new()
    };

    let body = format!(
        "<video controls preload=\"metadata\"{poster}>\
         <source src=\"/stream/{id}\" type=\"video/mp4\"></video>\
         <h1>{title}</h1>\
         <p class=\"meta\">{year} · {duration} · {size} · ⭐ {rating}</p>\
         <p>{genres}</p><p>{description}</p>",
        id = movie.message_id,
        title = text(&movie.title),
        year = text(&movie.year),
        duration = format_duration(movie.duration),
        size = format_file_size(movie.file_size),
        rating = text(&movie.rating),
        genres = genres.join(", "),
        description = text(&movie.description),
    );

    layout(&movie.title, &body)
}

/// Movies of one genre.
#[must_use]
pub fn category_page(genre: &str, movies: &[&CatalogItem]) -> String {
    let mut body = format!(
        "<h1>{}</h1><p class=\"meta\">{} movies</p>",
        text(genre),
        movies.len()
    );
    if movies.is_empty() {
        body.push_str("<p>Nothing in this category yet.</p>");
    }
    movie_row(&mut body, movies);
    layout(genre, &body)
}

/// Minimal error page.
#[must_use]
pub fn error_page(code: u16, message: &str) -> String {
    let body = format!(
        "<h1>{code}</h1><p>{}</p><p><a href=\"/\">Back to the catalog</a></p>",
        text(message)
    );
    layout("Error", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: i64, title: &str, genre: &[&str]) -> CatalogItem {
        CatalogItem {
            message_id: id,
            title: title.to_string(),
            year: "1999".to_string(),
            genre: genre.iter().map(ToString::to_string).collect(),
            rating: "8.7".to_string(),
            description: "Red pill <or> blue pill".to_string(),
            duration: 8160,
            file_id: "f".to_string(),
            file_size: 1_610_612_736,
            thumbnail: None,
            added_date: None,
        }
    }

    #[test]
    fn test_watch_page_escapes_and_formats() {
        let html = watch_page(&movie(7, "The <Matrix>", &["Sci-Fi"]));

        assert!(html.contains("The &lt;Matrix&gt;"));
        assert!(html.contains("Red pill &lt;or&gt; blue pill"));
        assert!(html.contains("2h 16m"));
        assert!(html.contains("1.5 GB"));
        assert!(html.contains("src=\"/stream/7\""));
    }

    #[test]
    fn test_index_groups_by_genre() {
        let snapshot = CatalogSnapshot::new(vec![
            movie(1, "A", &["Science Fiction"]),
            movie(2, "B", &["Drama"]),
        ]);
        let html = index_page(&snapshot, &["Drama".to_string()]);

        assert!(html.contains("/category/Science%20Fiction"));
        assert!(html.find(">Science Fiction<") < html.find(">Drama</a></h2>"));
        assert!(html.contains("2 movies"));
    }

    #[test]
    fn test_error_page() {
        let html = error_page(404, "Movie not found");
        assert!(html.contains("<h1>404</h1>"));
        assert!(html.contains("Movie not found"));
    }
}

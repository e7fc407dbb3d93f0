use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use scraper::{Html, Selector};
use tracing::info;

use super::error::{FillError, Result};
use super::types::Identifier;

/// Collects detail-page identifiers from the snapshots, in file order and then
/// document order, keeping only the first sighting of each.
pub fn harvest_identifiers(snapshots: &[PathBuf], marker: &str) -> Result<Vec<Identifier>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for path in snapshots {
        info!(snapshot = %path.display(), "reading listing snapshot");
        let html = fs::read_to_string(path).map_err(FillError::at(path))?;
        for id in detail_identifiers(&html, marker) {
            if seen.insert(id.clone()) {
                out.push(id);
            }
        }
    }

    info!(unique = out.len(), "collected detail links");
    Ok(out)
}

pub fn detail_identifiers(html: &str, marker: &str) -> Vec<Identifier> {
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let doc = Html::parse_document(html);
    doc.select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| Identifier::from_detail_href(href, marker))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "/ofertas-de-trabajo/oferta-de-trabajo-de-";

    fn write(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn fragments_collapse_across_documents() {
        let dir = tempfile::tempdir().unwrap();
        let first = write(
            dir.path(),
            "buenos_aires_p1.html",
            r##"<html><body>
                <a href="/ofertas-de-trabajo/oferta-de-trabajo-de-cajero-AB12#lc=ListOffers-Score-1">Cajero</a>
                <a href="/ofertas-de-trabajo/oferta-de-trabajo-de-chofer-CD34">Chofer</a>
            </body></html>"##,
        );
        let second = write(
            dir.path(),
            "buenos_aires_p2.html",
            r##"<html><body>
                <a href="/ofertas-de-trabajo/oferta-de-trabajo-de-cajero-AB12#lc=ListOffers-Score-9">Cajero</a>
                <a href="/ofertas-de-trabajo/oferta-de-trabajo-de-mozo-EF56">Mozo</a>
            </body></html>"##,
        );

        let ids = harvest_identifiers(&[first, second], MARKER).unwrap();
        let ids = ids.iter().map(Identifier::as_str).collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                "/ofertas-de-trabajo/oferta-de-trabajo-de-cajero-AB12",
                "/ofertas-de-trabajo/oferta-de-trabajo-de-chofer-CD34",
                "/ofertas-de-trabajo/oferta-de-trabajo-de-mozo-EF56",
            ]
        );
    }

    #[test]
    fn links_without_marker_are_ignored() {
        let html = r#"<html><body>
            <nav><a href="/empleos-en-buenos-aires?p=2">Siguiente</a></nav>
            <article class="box_offer">
              <a href="/ofertas-de-trabajo/oferta-de-trabajo-de-vendedor-1">Vendedor</a>
            </article>
            <a href="https://ads.example.com/ofertas-de-trabajo/">Publicidad</a>
            <a>sin destino</a>
        </body></html>"#;

        let ids = detail_identifiers(html, MARKER);
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].as_str(), "/ofertas-de-trabajo/oferta-de-trabajo-de-vendedor-1");
    }

    #[test]
    fn unreadable_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("buenos_aires_p9.html");
        let err = harvest_identifiers(&[missing], MARKER).unwrap_err();
        assert!(matches!(err, FillError::Path { .. }));
    }
}

//! SVG outline renderer.
//!
//! One closed `<path>` per region (`M` to the first vertex, `L` through the
//! rest, `Z`), drawn over an optional PNG background, followed by one numeric
//! `<text>` label per region at the polygon centroid.

use std::fmt::{self, Write};

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::helper::segmentation::RegionContour;
use crate::modules::renderer::{Artifact, ArtifactKind, RenderInput, Renderer};
use crate::modules::style_catalog::RegionStyle;
use crate::utils::image::encode_png_base64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SvgRenderer;

impl Renderer for SvgRenderer {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Vector
    }

    fn render(&self, input: &RenderInput<'_>) -> Result<Artifact> {
        let background = input.background.map(encode_png_base64).transpose()?;
        let out = write_document(input, background.as_deref())
            .map_err(|e| PipelineError::processing(format!("svg formatting failed: {e}")))?;
        Ok(Artifact::new(ArtifactKind::Vector, out.into_bytes()))
    }
}

fn write_document(input: &RenderInput<'_>, background: Option<&str>) -> std::result::Result<String, fmt::Error> {
    let (w, h) = (input.shape.width, input.shape.height);
    let mut out = String::with_capacity(256 + input.contours.total_points() * 12);

    writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#
    )?;

    if let Some(encoded) = background {
        writeln!(
            out,
            r#"  <image href="data:image/png;base64,{encoded}" x="0" y="0" width="{w}" height="{h}" class="background-image"/>"#
        )?;
    }

    for (region_id, contour) in input.contours.iter() {
        let style = input.styles.style_for(region_id);
        write_path(&mut out, region_id, contour, &style)?;
    }

    for (region_id, contour) in input.contours.iter() {
        let style = input.styles.style_for(region_id);
        if !write_label(&mut out, region_id, contour, &style)? {
            debug!(region_id, "no usable centroid, region rendered without label");
        }
    }

    out.push_str("</svg>\n");
    Ok(out)
}

/// path_data turns contour vertices into SVG path commands.
pub fn path_data(contour: &RegionContour) -> String {
    let commands: Vec<String> = contour
        .points()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let cmd = if i == 0 { 'M' } else { 'L' };
            format!("{cmd}{},{}", p.x, p.y)
        })
        .collect();
    format!("{} Z", commands.join(" "))
}

fn write_path(out: &mut String, region_id: u32, contour: &RegionContour, style: &RegionStyle) -> fmt::Result {
    write!(
        out,
        r#"  <path d="{}" stroke="{}" stroke-width="{}" fill="{}""#,
        path_data(contour),
        style.stroke.to_css(),
        style.stroke_width,
        style.fill.to_css(),
    )?;
    if let Some(dash) = style.dash_css() {
        write!(out, r#" stroke-dasharray="{dash}""#)?;
    }
    writeln!(out, r#" class="region-{region_id}"/>"#)
}

/// Returns false when the label could not be placed.
fn write_label(
    out: &mut String,
    region_id: u32,
    contour: &RegionContour,
    style: &RegionStyle,
) -> std::result::Result<bool, fmt::Error> {
    let Some((cx, cy)) = contour.centroid() else {
        return Ok(false);
    };
    if !cx.is_finite() || !cy.is_finite() {
        return Ok(false);
    }
    writeln!(
        out,
        r#"  <text x="{}" y="{}" fill="{}" font-size="{}" text-anchor="middle" dominant-baseline="middle" class="region-label-{region_id}">{region_id}</text>"#,
        cx.round() as i64,
        cy.round() as i64,
        style.label_color.to_css(),
        style.label_font_size,
    )?;
    Ok(true)
}

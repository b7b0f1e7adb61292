//! CityGML 2.0 serialization.
//!
//! Buildings are first lowered into a small typed element tree ([`Element`]) and
//! the tree is then written with escaping and two-space indentation. Coordinates
//! go through [`format_coord`] everywhere (six decimals, no negative zero), so
//! envelopes and rings can never disagree on formatting.

use std::borrow::Cow;
use std::io::{self, Write};
use std::path::Path;

use log::debug;

use crate::builder::{Building, Code, LodMode, Polygon};
use crate::error::Result;
use crate::geom::Bounds3;
use crate::write_atomically;

pub const NS_CORE: &str = "http://www.opengis.net/citygml/2.0";
pub const NS_BLDG: &str = "http://www.opengis.net/citygml/building/2.0";
pub const NS_APP: &str = "http://www.opengis.net/citygml/appearance/2.0";
pub const NS_GEN: &str = "http://www.opengis.net/citygml/generics/2.0";
pub const NS_GRP: &str = "http://www.opengis.net/citygml/cityobjectgroup/2.0";
pub const NS_GML: &str = "http://www.opengis.net/gml";
pub const NS_XLINK: &str = "http://www.w3.org/1999/xlink";
pub const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

const SCHEMA_LOCATION: &str = "http://www.opengis.net/citygml/2.0 \
http://schemas.opengis.net/citygml/2.0/cityGMLBase.xsd \
http://www.opengis.net/citygml/building/2.0 \
http://schemas.opengis.net/citygml/building/2.0/building.xsd \
http://www.opengis.net/citygml/generics/2.0 \
http://schemas.opengis.net/citygml/generics/2.0/generics.xsd";

const EPSG_URI: &str = "http://www.opengis.net/def/crs/EPSG/0/";

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: Cow<'static, str>,
    pub attrs: Vec<(Cow<'static, str>, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Direct child elements with the given name.
    pub fn find<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter_map(move |node| match node {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    pub fn attr_value(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn write_to<W: Write>(&self, w: &mut W, depth: usize) -> io::Result<()> {
        indent(w, depth)?;
        write!(w, "<{}", self.name)?;
        for (key, value) in &self.attrs {
            write!(w, " {}=\"{}\"", key, escape(value))?;
        }

        match self.children.as_slice() {
            [] => w.write_all(b"/>\n"),
            [Node::Text(text)] => writeln!(w, ">{}</{}>", escape(text), self.name),
            children => {
                w.write_all(b">\n")?;
                for node in children {
                    match node {
                        Node::Element(e) => e.write_to(w, depth + 1)?,
                        Node::Text(text) => {
                            indent(w, depth + 1)?;
                            writeln!(w, "{}", escape(text))?;
                        }
                    }
                }
                indent(w, depth)?;
                writeln!(w, "</{}>", self.name)
            }
        }
    }
}

fn indent<W: Write>(w: &mut W, depth: usize) -> io::Result<()> {
    for _ in 0..depth {
        w.write_all(b"  ")?;
    }
    Ok(())
}

pub fn escape(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Six decimals; values that round to zero are written without a sign.
pub fn format_coord(v: f64) -> String {
    let s = format!("{v:.6}");
    match s.strip_prefix('-') {
        Some(rest) if rest.bytes().all(|b| b == b'0' || b == b'.') => rest.to_owned(),
        _ => s,
    }
}

pub fn format_position(p: [f64; 3]) -> String {
    format!("{} {} {}", format_coord(p[0]), format_coord(p[1]), format_coord(p[2]))
}

/// Flat, space-separated coordinate list.
pub fn pos_list(points: &[[f64; 3]]) -> String {
    points
        .iter()
        .map(|&p| format_position(p))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `srsName` for a CRS label: a label that already is a URI/URN is kept, a bare
/// code becomes an EPSG URI.
pub fn srs_name(label: &str) -> String {
    if label.contains(':') {
        label.to_owned()
    } else {
        format!("{EPSG_URI}{label}")
    }
}

fn envelope(bounds: &Bounds3, srs: &str) -> Element {
    Element::new("gml:Envelope")
        .attr("srsName", srs)
        .attr("srsDimension", "3")
        .child(Element::new("gml:lowerCorner").text(format_position(bounds.min)))
        .child(Element::new("gml:upperCorner").text(format_position(bounds.max)))
}

fn polygon(p: &Polygon) -> Element {
    Element::new("gml:Polygon").attr("gml:id", p.id.as_str()).child(
        Element::new("gml:exterior").child(
            Element::new("gml:LinearRing").child(
                Element::new("gml:posList")
                    .attr("srsDimension", "3")
                    .text(pos_list(&p.ring)),
            ),
        ),
    )
}

fn code(name: &'static str, c: &Code) -> Element {
    let mut e = Element::new(name);
    if let Some(space) = &c.code_space {
        e = e.attr("codeSpace", space.as_str());
    }
    e.text(c.value.as_str())
}

fn solid(building: &Building) -> Element {
    let mut composite = Element::new("gml:CompositeSurface");
    for p in &building.polygons {
        let member = if building.lod.has_surfaces() {
            // The polygon itself lives in its boundary surface.
            Element::new("gml:surfaceMember").attr("xlink:href", format!("#{}", p.id))
        } else {
            Element::new("gml:surfaceMember").child(polygon(p))
        };
        composite.push(member);
    }

    Element::new(format!("bldg:lod{}Solid", building.lod.level())).child(
        Element::new("gml:Solid")
            .attr("gml:id", building.solid_id.as_str())
            .child(Element::new("gml:exterior").child(composite)),
    )
}

fn boundary_surfaces(building: &Building) -> Vec<Element> {
    let multi_surface = format!("bldg:lod{}MultiSurface", building.lod.level());

    building
        .surfaces
        .iter()
        .map(|surface| {
            let mut multi = Element::new("gml:MultiSurface");
            for p in building.surface_polygons(surface) {
                multi.push(Element::new("gml:surfaceMember").child(polygon(p)));
            }

            let mut e = Element::new(surface.class.element()).attr("gml:id", surface.id.as_str());
            if let Some(description) = &surface.description {
                e = e.child(Element::new("gml:description").text(description.as_str()));
            }
            e = e
                .child(Element::new("gml:name").text(surface.name.as_str()))
                .child(Element::new(multi_surface.clone()).child(multi));

            Element::new("bldg:boundedBy").child(e)
        })
        .collect()
}

/// `bldg:Building` element, children in schema order.
pub fn building_element(building: &Building) -> Element {
    let a = &building.attributes;
    let mut e = Element::new("bldg:Building").attr("gml:id", building.id.as_str());

    if let Some(description) = &a.description {
        e.push(Element::new("gml:description").text(description.as_str()));
    }
    if let Some(name) = &a.name {
        e.push(Element::new("gml:name").text(name.as_str()));
    }
    if let Some(date) = &a.creation_date {
        e.push(Element::new("core:creationDate").text(date.as_str()));
    }
    if let Some(relative) = &a.relative_to_terrain {
        e.push(Element::new("core:relativeToTerrain").text(relative.as_str()));
    }
    for (name, value) in &a.strings {
        e.push(
            Element::new("gen:stringAttribute")
                .attr("name", name.as_str())
                .child(Element::new("gen:value").text(value.as_str())),
        );
    }
    for m in &a.measures {
        e.push(
            Element::new("gen:measureAttribute")
                .attr("name", m.name.as_str())
                .child(
                    Element::new("gen:value")
                        .attr("uom", m.uom.as_str())
                        .text(format!("{:.2}", m.value)),
                ),
        );
    }
    for (name, value) in [("bldg:class", &a.class), ("bldg:function", &a.function), ("bldg:usage", &a.usage)] {
        if let Some(c) = value {
            e.push(code(name, c));
        }
    }
    if let Some(year) = a.year_of_construction {
        e.push(Element::new("bldg:yearOfConstruction").text(year.to_string()));
    }
    if let Some(c) = &a.roof_type {
        e.push(code("bldg:roofType", c));
    }
    e.push(
        Element::new("bldg:measuredHeight")
            .attr("uom", "m")
            .text(format!("{:.2}", building.measured_height)),
    );
    if let Some(n) = a.storeys_above_ground {
        e.push(Element::new("bldg:storeysAboveGround").text(n.to_string()));
    }
    if let Some(n) = a.storeys_below_ground {
        e.push(Element::new("bldg:storeysBelowGround").text(n.to_string()));
    }

    // lod1/lod2 solids precede the boundary surfaces, lod3 solids follow them.
    match building.lod {
        LodMode::Lod1 => e.push(solid(building)),
        LodMode::Lod2 => {
            e.push(solid(building));
            boundary_surfaces(building).into_iter().for_each(|s| e.push(s));
        }
        LodMode::Lod3 => {
            boundary_surfaces(building).into_iter().for_each(|s| e.push(s));
            e.push(solid(building));
        }
    }

    e
}

/// One CityGML document: a CRS label plus its buildings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityModel {
    /// CRS label: a bare EPSG code or a full URI.
    pub crs: String,
    pub name: Option<String>,
    pub buildings: Vec<Building>,
}

impl CityModel {
    pub fn new(crs: impl Into<String>) -> Self {
        Self {
            crs: crs.into(),
            name: None,
            buildings: Vec::new(),
        }
    }

    pub fn with_building(mut self, building: Building) -> Self {
        self.buildings.push(building);
        self
    }

    /// Union of the building envelopes.
    pub fn envelope(&self) -> Bounds3 {
        let mut bounds = Bounds3::empty();
        for b in &self.buildings {
            bounds.union(&b.envelope);
        }
        bounds
    }

    pub fn to_element(&self) -> Element {
        let mut root = Element::new("core:CityModel")
            .attr("xmlns:core", NS_CORE)
            .attr("xmlns:bldg", NS_BLDG)
            .attr("xmlns:app", NS_APP)
            .attr("xmlns:gen", NS_GEN)
            .attr("xmlns:grp", NS_GRP)
            .attr("xmlns:gml", NS_GML)
            .attr("xmlns:xlink", NS_XLINK)
            .attr("xmlns:xsi", NS_XSI)
            .attr("xsi:schemaLocation", SCHEMA_LOCATION);

        if let Some(name) = &self.name {
            root.push(Element::new("gml:name").text(name.as_str()));
        }

        let bounds = self.envelope();
        if !bounds.is_empty() {
            root.push(Element::new("gml:boundedBy").child(envelope(&bounds, &srs_name(&self.crs))));
        }

        for building in &self.buildings {
            root.push(Element::new("core:cityObjectMember").child(building_element(building)));
        }

        root
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")?;
        self.to_element().write_to(w, 0)
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Write the document to `path` through a temporary file.
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        write_atomically(path, |w| self.write_to(w))?;
        debug!("Wrote {} building(s) to {}", self.buildings.len(), path.display());
        Ok(())
    }
}

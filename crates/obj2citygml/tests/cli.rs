use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::tempdir;

const SCENE: &str = "\
v 1 1 0
v 3 1 0
v 3 3 0
v 1 3 0
v 1 1 4
v 3 1 4
v 3 3 4
v 1 3 4
v 21 1.5 0
v 23 1.5 0
v 23 3 0
v 21 1.5 7
o house
f 1 4 3 2
f 5 6 7 8
f 1 2 6 5
f 2 3 7 6
f 3 4 8 7
f 4 1 5 8
o shed
f 9 10 12
f 10 11 12
f 9 12 11
o lost
f 9 10 11
";

// World coordinates; the CLI shifts them by --cx/--cy = 500/700.
const FOOTPRINTS: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    { "type": "Feature", "properties": { "id": "house" },
      "geometry": { "type": "Polygon",
        "coordinates": [[[500,700],[510,700],[510,710],[500,710],[500,700]]] } },
    { "type": "Feature", "properties": { "id": "shed" },
      "geometry": { "type": "MultiPolygon",
        "coordinates": [[[[520,700],[525,700],[525,705],[520,705]]]] } }
  ]
}"#;

fn separate(dir: &Path) -> std::path::PathBuf {
    let obj = dir.join("scene.obj");
    let footprints = dir.join("footprints.geojson");
    fs::write(&obj, SCENE).unwrap();
    fs::write(&footprints, FOOTPRINTS).unwrap();
    let out = dir.join("buildings");

    cargo_bin_cmd!("obj2citygml")
        .arg("separate")
        .arg("--obj")
        .arg(&obj)
        .arg("--footprints")
        .arg(&footprints)
        .arg("--output-dir")
        .arg(&out)
        .args(["--cx", "500", "--cy", "700", "--tile-size", "10"])
        .assert()
        .success();

    out
}

fn sorted_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn separate_writes_buildings_and_registry() {
    let dir = tempdir().unwrap();
    let out = separate(dir.path());

    // house: first-vertex centroid (1.67, 1.67) -> 501/701; shed and lost share a footprint.
    assert_eq!(sorted_names(&out), vec!["scene_501_701.obj", "scene_521_701.obj"]);

    let registry = fs::read_to_string(dir.path().join("scene.csv")).unwrap();
    let lines: Vec<&str> = registry.lines().collect();
    assert_eq!(lines[0], "X,Y,Z,Index");
    assert_eq!(lines.len(), 4);
    assert!(lines[1].ends_with(",0"));
    assert!(lines[2].ends_with(",1"));
    assert!(lines[3].ends_with(",1"));
}

#[test]
fn convert_builds_one_document_per_mesh() {
    let dir = tempdir().unwrap();
    let buildings = separate(dir.path());
    let gml_dir = dir.path().join("gml");

    cargo_bin_cmd!("obj2citygml")
        .arg("convert")
        .arg("--input-dir")
        .arg(&buildings)
        .arg("--output-dir")
        .arg(&gml_dir)
        .args(["--lod", "lod2", "--epsg", "25832", "--year", "2020"])
        .assert()
        .success();

    assert_eq!(sorted_names(&gml_dir), vec!["scene_501_701.gml", "scene_521_701.gml"]);

    let xml = fs::read_to_string(gml_dir.join("scene_501_701.gml")).unwrap();
    assert!(xml.contains("srsName=\"http://www.opengis.net/def/crs/EPSG/0/25832\""));
    assert!(xml.contains("<bldg:Building gml:id=\"scene_501_701\">"));
    assert!(xml.contains("<bldg:yearOfConstruction>2020</bldg:yearOfConstruction>"));
    assert!(xml.contains("<bldg:measuredHeight uom=\"m\">4.00</bldg:measuredHeight>"));
    assert!(xml.contains("<bldg:lod2Solid>"));
    assert!(xml.contains("bldg:RoofSurface"));
}

#[test]
fn convert_skips_existing_and_reports_failures() {
    let dir = tempdir().unwrap();
    let buildings = separate(dir.path());
    let gml_dir = dir.path().join("gml");
    fs::create_dir_all(&gml_dir).unwrap();

    let existing = gml_dir.join("scene_501_701.gml");
    fs::write(&existing, "keep").unwrap();
    fs::write(buildings.join("broken.obj"), "# no geometry\n").unwrap();

    cargo_bin_cmd!("obj2citygml")
        .arg("convert")
        .arg("--input-dir")
        .arg(&buildings)
        .arg("--output-dir")
        .arg(&gml_dir)
        .assert()
        .failure();

    assert_eq!(fs::read_to_string(&existing).unwrap(), "keep");
    assert!(gml_dir.join("scene_521_701.gml").exists());
    assert!(!gml_dir.join("broken.gml").exists());
}

#[test]
fn separate_requires_footprints() {
    let dir = tempdir().unwrap();
    let obj = dir.path().join("scene.obj");
    fs::write(&obj, SCENE).unwrap();

    cargo_bin_cmd!("obj2citygml")
        .arg("separate")
        .arg("--obj")
        .arg(&obj)
        .arg("--footprints")
        .arg(dir.path().join("missing.geojson"))
        .assert()
        .failure();
}

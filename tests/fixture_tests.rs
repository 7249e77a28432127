use pretty_assertions::assert_eq;
use transit_equity::cache::ArtifactCache;
use transit_equity::config::{PipelineConfig, SourceConfig};
use transit_equity::join::{AssignmentPolicy, RouteJoinConfig, RouteScan};
use transit_equity::model::StopRouteAssignment;
use transit_equity::pipeline::{DatasetPipeline, Stage};
use transit_equity::sources::PipelineSources;

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn fixture_sources() -> SourceConfig {
    SourceConfig {
        stops: fixture("stops.geojson"),
        routes: fixture("routes.geojson"),
        tracts: fixture("tracts.geojson"),
        income: fixture("income.json"),
        tract_population: fixture("tract_population.json"),
        county_population: fixture("county_population.json"),
        ridership: fixture("ntd_master.csv"),
        ..SourceConfig::default()
    }
}

#[tokio::test]
async fn test_full_pipeline_from_fixture_files() {
    let dir = tempfile::tempdir().unwrap();
    let sources = PipelineSources::from_config(&fixture_sources()).unwrap();
    let cache = ArtifactCache::open(dir.path()).unwrap();
    let pipeline = DatasetPipeline::new(PipelineConfig::default(), cache, sources);

    let output = pipeline.generate(false).await.unwrap();

    // Stop 1005 has no geometry and never enters the stop layer.
    assert_eq!(output.stop_routes.len(), 4);

    // 1003 sits in a tract with suppressed income, 1004 outside every tract.
    let joined: Vec<_> = output
        .joined
        .iter()
        .map(|r| {
            (
                r.stop_id.as_str(),
                r.census_tract.as_str(),
                r.route_id.as_str(),
                r.ridership_agency.as_deref(),
            )
        })
        .collect();
    assert_eq!(
        joined,
        vec![
            (
                "1001",
                "25025000100",
                "R1",
                Some("Worcester Regional Transit Authority")
            ),
            (
                "1002",
                "25025000200",
                "R2",
                Some("Cape Cod Regional Transit Authority")
            ),
        ]
    );

    let first = &output.joined[0];
    assert_eq!(first.stop_name.as_deref(), Some("Main St @ Elm St"));
    assert_eq!(first.median_household_income, 61250.0);
    assert_eq!(first.population, 4123);
    assert_eq!(first.route_long_name.as_deref(), Some("Main Street"));
    assert!((first.longitude + 71.08).abs() < 1e-9);
    assert!((first.latitude - 42.32).abs() < 1e-9);
    assert!(first.route_distance.unwrap() < 1e-6);

    let agencies: Vec<_> = output.ridership.iter().map(|r| r.agency.as_str()).collect();
    assert_eq!(
        agencies,
        vec![
            "Worcester Regional Transit Authority",
            "Cape Cod Regional Transit Authority"
        ]
    );

    assert_eq!(output.county_population.len(), 2);
    assert_eq!(output.county_population[1].population, 830622);

    for stage in Stage::ALL {
        assert!(dir.path().join(stage.file_name()).is_file(), "{stage}");
    }
}

#[tokio::test]
async fn test_threshold_policy_leaves_distant_stops_unassigned() {
    let dir = tempfile::tempdir().unwrap();
    let source_config = SourceConfig {
        ridership: fixture("ntd_master.xlsx"),
        ..fixture_sources()
    };
    let sources = PipelineSources::from_config(&source_config).unwrap();
    let cache = ArtifactCache::open(dir.path()).unwrap();
    let config = PipelineConfig {
        route_join: RouteJoinConfig {
            policy: AssignmentPolicy::Threshold { threshold: 100.0 },
            scan: RouteScan::Naive,
            workers: 2,
        },
        ..PipelineConfig::default()
    };
    let pipeline = DatasetPipeline::new(config, cache, sources);

    let output = pipeline.generate(false).await.unwrap();

    let far = output
        .stop_routes
        .iter()
        .find(|r| r.stop_id == "1004")
        .unwrap();
    assert_eq!(
        far,
        &StopRouteAssignment {
            stop_id: "1004".into(),
            route_id: None,
            distance: None,
        }
    );
    assert_eq!(output.joined.len(), 2);

    // Ridership came from the workbook's MASTER sheet.
    let agencies: Vec<_> = output.ridership.iter().map(|r| r.agency.as_str()).collect();
    assert_eq!(
        agencies,
        vec![
            "Worcester Regional Transit Authority",
            "Cape Cod Regional Transit Authority"
        ]
    );
    assert_eq!(output.ridership[0].ntd_id, "10007");
}

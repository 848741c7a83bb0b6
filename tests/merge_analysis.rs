use std::cell::Cell;
use table_check::{
    config::Merge,
    merge::{
        HeuristicAdvisor, MergeAdvisor, MergeContext, MergeScope, MergeType, MergeVerdict,
        TableMergeAnalyzer, TablePair,
        document::{Block, Document, Page, TableBlock, TextBlock},
        title::TitleSource,
    },
    table::{BBox, CellValue},
};

fn rows(data: &[&[&str]]) -> Vec<Vec<CellValue>> {
    data.iter()
        .map(|r| r.iter().map(|c| CellValue::from(*c)).collect())
        .collect()
}

fn table(id: &str, data: &[&[&str]], bbox: Option<BBox>) -> Block {
    Block::Table(TableBlock {
        id: id.into(),
        rows: rows(data),
        bbox,
    })
}

fn text(s: &str) -> Block {
    Block::Text(TextBlock {
        text: s.into(),
        bbox: None,
    })
}

fn caption(s: &str) -> Block {
    Block::Caption(TextBlock {
        text: s.into(),
        bbox: None,
    })
}

fn header(s: &str) -> Block {
    Block::SectionHeader(TextBlock {
        text: s.into(),
        bbox: None,
    })
}

fn page(page_id: u32, blocks: Vec<Block>) -> Page {
    Page {
        page_id,
        height: Some(800.0),
        blocks,
    }
}

fn heuristic() -> TableMergeAnalyzer {
    let cfg = Merge::default();
    TableMergeAnalyzer::new(&cfg, Box::new(HeuristicAdvisor::new(&cfg)))
}

/// Always recommends merging at a fixed confidence.
struct FixedAdvisor(f64);

impl MergeAdvisor for FixedAdvisor {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn analyze(&self, _pair: &TablePair<'_>, _context: &MergeContext) -> MergeVerdict {
        MergeVerdict {
            should_merge: true,
            confidence: self.0,
            merge_type: MergeType::VerticalAppend,
            reasoning: "fixed".into(),
            warnings: Vec::new(),
            adjacent: None,
            continuation: None,
        }
    }
}

/// Replays verdicts in call order.
struct ScriptedAdvisor {
    verdicts: Vec<(bool, f64)>,
    next: Cell<usize>,
}

impl MergeAdvisor for ScriptedAdvisor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn analyze(&self, _pair: &TablePair<'_>, _context: &MergeContext) -> MergeVerdict {
        let i = self.next.get();
        self.next.set(i + 1);
        let (should_merge, confidence) = self.verdicts[i];
        MergeVerdict {
            should_merge,
            confidence,
            merge_type: MergeType::VerticalAppend,
            reasoning: format!("verdict {i}"),
            warnings: Vec::new(),
            adjacent: None,
            continuation: None,
        }
    }
}

fn two_tables_same_page() -> Document {
    Document {
        pages: vec![page(
            1,
            vec![
                table("t1", &[&["a"], &["1"]], None),
                table("t2", &[&["b"], &["2"]], None),
            ],
        )],
    }
}

fn two_tables_across_pages() -> Document {
    Document {
        pages: vec![
            page(1, vec![table("t1", &[&["a"], &["1"]], None)]),
            page(2, vec![table("t2", &[&["b"], &["2"]], None)]),
        ],
    }
}

#[test]
fn split_table_with_repeated_header_is_merged() {
    let header_row: &[&str] = &["Name", "Age", "City"];
    let doc = Document {
        pages: vec![page(
            1,
            vec![
                caption("Table 2: Staff directory"),
                table(
                    "t1",
                    &[header_row, &["Ann", "31", "Oslo"], &["Bo", "45", "Rome"]],
                    Some(BBox::new(50.0, 100.0, 550.0, 300.0)),
                ),
                table(
                    "t2",
                    &[header_row, &["Cy", "28", "Lima"]],
                    Some(BBox::new(50.0, 310.0, 550.0, 400.0)),
                ),
            ],
        )],
    };

    let analyses = heuristic().analyze_document(&doc);
    assert_eq!(analyses.len(), 1);
    let a = &analyses[0];
    assert_eq!(a.scope, MergeScope::SamePage);
    assert!(a.should_merge, "{}", a.reasoning);
    assert!((a.confidence - 1.0).abs() < 1e-9);
    assert_eq!(a.merge_type, MergeType::VerticalAppend);
    assert!(a.column_analysis.columns_match);
    assert!(a.column_analysis.headers_match);
    assert_eq!(a.content_analysis.adjacent, Some(true));
    assert_eq!(a.content_analysis.continuation, Some(true));
    assert_eq!(a.table_title.source, TitleSource::Caption);

    let instr = a.merge_instructions.as_ref().expect("instructions");
    assert_eq!(instr.target_table_id, "t1");
    assert_eq!(instr.append_table_id, "t2");
    assert!(instr.drop_repeated_header);
    assert_eq!(instr.title.as_deref(), Some("Table 2: Staff directory"));
}

#[test]
fn column_mismatch_is_never_merged() {
    let doc = Document {
        pages: vec![page(
            1,
            vec![
                table("t1", &[&["a", "b"], &["1", "2"]], Some(BBox::new(0.0, 0.0, 100.0, 50.0))),
                table("t2", &[&["a", "b", "c"]], Some(BBox::new(0.0, 55.0, 100.0, 90.0))),
            ],
        )],
    };
    let a = &heuristic().analyze_document(&doc)[0];
    assert!(!a.should_merge);
    assert_eq!(a.merge_type, MergeType::None);
    assert!(a.merge_instructions.is_none());
}

#[test]
fn distant_tables_lose_the_adjacency_bonus() {
    let doc = Document {
        pages: vec![page(
            1,
            vec![
                table("t1", &[&["x", "y"], &["1", "2"]], Some(BBox::new(0.0, 0.0, 100.0, 50.0))),
                table("t2", &[&["p", "q"]], Some(BBox::new(0.0, 500.0, 100.0, 550.0))),
            ],
        )],
    };
    let a = &heuristic().analyze_document(&doc)[0];
    assert_eq!(a.content_analysis.adjacent, Some(false));
    assert_eq!(a.content_analysis.continuation, Some(false));
    // base plus the matching-columns bonus only
    assert!((a.confidence - 0.8).abs() < 1e-9);
    assert!(a.should_merge);
}

#[test]
fn missing_geometry_is_a_warning() {
    let a = &heuristic().analyze_document(&two_tables_same_page())[0];
    assert_eq!(a.content_analysis.adjacent, None);
    assert!(a.warnings.iter().any(|w| w.contains("adjacency")));
}

#[test]
fn same_page_threshold_is_strict() {
    let cfg = Merge::default();
    let at = TableMergeAnalyzer::new(&cfg, Box::new(FixedAdvisor(0.70)));
    let above = TableMergeAnalyzer::new(&cfg, Box::new(FixedAdvisor(0.71)));

    let a = &at.analyze_document(&two_tables_same_page())[0];
    assert!(!a.should_merge);
    assert!(a.warnings.iter().any(|w| w.contains("threshold")));
    assert!(above.analyze_document(&two_tables_same_page())[0].should_merge);
}

#[test]
fn cross_page_needs_more_confidence() {
    let cfg = Merge::default();
    let analyzer = TableMergeAnalyzer::new(&cfg, Box::new(FixedAdvisor(0.75)));

    let same = &analyzer.analyze_document(&two_tables_same_page())[0];
    assert!(same.should_merge);

    let cross = &analyzer.analyze_document(&two_tables_across_pages())[0];
    assert_eq!(cross.scope, MergeScope::CrossPage);
    assert_eq!((cross.page1, cross.page2), (1, 2));
    assert!(!cross.should_merge);

    let sure = TableMergeAnalyzer::new(&cfg, Box::new(FixedAdvisor(0.85)));
    assert!(sure.analyze_document(&two_tables_across_pages())[0].should_merge);
}

#[test]
fn cross_page_pairs_only_span_consecutive_pages() {
    let doc = Document {
        pages: vec![
            page(1, vec![table("t1", &[&["a"]], None)]),
            page(3, vec![table("t2", &[&["b"]], None)]),
        ],
    };
    let analyzer = TableMergeAnalyzer::new(&Merge::default(), Box::new(FixedAdvisor(0.95)));
    assert!(analyzer.analyze_document(&doc).is_empty());
}

#[test]
fn cross_page_pairs_last_with_first() {
    let doc = Document {
        pages: vec![
            page(
                1,
                vec![table("t1", &[&["a"]], None), table("t2", &[&["b"]], None)],
            ),
            page(
                2,
                vec![table("t3", &[&["c"]], None), table("t4", &[&["d"]], None)],
            ),
        ],
    };
    let analyzer = TableMergeAnalyzer::new(&Merge::default(), Box::new(FixedAdvisor(0.95)));
    let pairs: Vec<(String, String)> = analyzer
        .analyze_document(&doc)
        .into_iter()
        .map(|a| (a.table1_id, a.table2_id))
        .collect();
    let expected = [("t1", "t2"), ("t3", "t4"), ("t2", "t3")];
    assert_eq!(pairs.len(), expected.len());
    for (got, want) in pairs.iter().zip(expected) {
        assert_eq!((got.0.as_str(), got.1.as_str()), want);
    }
}

fn split_across_pages(first_bbox: BBox, second_bbox: BBox) -> Document {
    Document {
        pages: vec![
            page(1, vec![table("t1", &[&["code", "name"], &["1", "2"]], Some(first_bbox))]),
            page(2, vec![table("t2", &[&["p", "q"]], Some(second_bbox))]),
        ],
    }
}

#[test]
fn table_running_off_the_page_bottom_merges_across_pages() {
    let doc = split_across_pages(
        BBox::new(50.0, 400.0, 550.0, 780.0),
        BBox::new(50.0, 40.0, 550.0, 300.0),
    );
    let a = &heuristic().analyze_document(&doc)[0];
    assert_eq!(a.scope, MergeScope::CrossPage);
    assert_eq!(a.content_analysis.adjacent, Some(true));
    assert_eq!(a.content_analysis.continuation, Some(false));
    assert!((a.confidence - 0.9).abs() < 1e-9);
    assert!(a.should_merge, "{}", a.reasoning);
    assert!(a.merge_instructions.is_some());
}

#[test]
fn mid_page_table_does_not_merge_across_pages() {
    let doc = split_across_pages(
        BBox::new(50.0, 200.0, 550.0, 450.0),
        BBox::new(50.0, 40.0, 550.0, 300.0),
    );
    let a = &heuristic().analyze_document(&doc)[0];
    assert_eq!(a.content_analysis.adjacent, Some(false));
    assert!((a.confidence - 0.8).abs() < 1e-9);
    assert!(!a.should_merge);
    assert_eq!(a.merge_type, MergeType::None);
    assert!(a.merge_instructions.is_none());
}

#[test]
fn tables_inside_groups_are_found() {
    let doc = Document {
        pages: vec![page(
            1,
            vec![
                Block::Group {
                    children: vec![text("Sales data by quarter"), table("t1", &[&["a"]], None)],
                },
                Block::Group {
                    children: vec![table("t2", &[&["b"]], None)],
                },
            ],
        )],
    };
    assert_eq!(doc.table_count(), 2);
    let analyses = heuristic().analyze_document(&doc);
    assert_eq!(analyses.len(), 1);
    let title = &analyses[0].table_title;
    assert!(title.is_inferred);
    assert_eq!(title.source, TitleSource::PrecedingParagraph);
    assert_eq!(title.text.as_deref(), Some("Inferred: Sales data by quarter"));
}

#[test]
fn section_header_title_is_truncated() {
    let long = format!("Quarterly {}", "regional ".repeat(12));
    let doc = Document {
        pages: vec![page(
            1,
            vec![
                header(&long),
                text("Nothing keyword-worthy here."),
                table("t1", &[&["a"]], None),
                table("t2", &[&["b"]], None),
            ],
        )],
    };
    let title = &heuristic().analyze_document(&doc)[0].table_title;
    assert_eq!(title.source, TitleSource::SectionHeader);
    let t = title.text.as_deref().unwrap();
    assert!(t.starts_with("Inferred: Quarterly"));
    assert_eq!(t.chars().count(), 80);
    assert!(t.ends_with("..."));
}

#[test]
fn single_table_documents_are_skipped() {
    let doc = Document {
        pages: vec![page(1, vec![table("t1", &[&["a"]], None)])],
    };
    assert!(heuristic().analyze_document(&doc).is_empty());

    let cfg = Merge {
        min_tables_for_claude_analysis: 3,
        ..Merge::default()
    };
    let analyzer = TableMergeAnalyzer::new(&cfg, Box::new(FixedAdvisor(0.95)));
    assert!(analyzer.analyze_document(&two_tables_same_page()).is_empty());
}

#[test]
fn merge_candidates_filters_rejections() {
    let doc = Document {
        pages: vec![page(
            1,
            vec![
                table("t1", &[&["a"]], None),
                table("t2", &[&["b"]], None),
                table("t3", &[&["c"]], None),
            ],
        )],
    };
    let cfg = Merge::default();
    let analyzer = TableMergeAnalyzer::new(
        &cfg,
        Box::new(ScriptedAdvisor {
            verdicts: vec![(true, 0.9), (false, 0.2)],
            next: Cell::new(0),
        }),
    );
    let candidates = analyzer.merge_candidates(&doc);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].table2_id, "t2");
}

#[test]
fn sequence_groups_are_contiguous() {
    let blocks: Vec<TableBlock> = (0..5)
        .map(|i| TableBlock {
            id: format!("t{i}"),
            rows: rows(&[&["x"]]),
            bbox: None,
        })
        .collect();
    let refs: Vec<&TableBlock> = blocks.iter().collect();
    let analyzer = TableMergeAnalyzer::new(
        &Merge::default(),
        Box::new(ScriptedAdvisor {
            verdicts: vec![(true, 0.9), (true, 0.65), (false, 0.9), (true, 0.8)],
            next: Cell::new(0),
        }),
    );
    let groups = analyzer.analyze_table_sequence(&refs, &MergeContext::default());
    assert_eq!(groups, vec![vec![0, 1], vec![2], vec![3, 4]]);

    let flat: Vec<usize> = groups.into_iter().flatten().collect();
    assert_eq!(flat, (0..5).collect::<Vec<_>>());
    assert!(analyzer.analyze_table_sequence(&[], &MergeContext::default()).is_empty());
}

#[test]
fn document_parses_from_block_json() {
    let raw = r#"{
        "pages": [{
            "page_id": 4,
            "height": 792.0,
            "blocks": [
                {"block_type": "caption", "text": "Table 7: Totals"},
                {"block_type": "table", "id": "a", "rows": [["k", 1], ["m", 2.5]],
                 "bbox": {"x0": 0, "y0": 10, "x1": 200, "y1": 90}},
                {"block_type": "group", "children": [
                    {"block_type": "table", "id": "b", "rows": [["n", null]]}
                ]}
            ]
        }]
    }"#;
    let doc: Document = serde_json::from_str(raw).unwrap();
    assert_eq!(doc.table_count(), 2);
    let page = doc.page(4).unwrap();
    let tables = page.tables();
    assert_eq!(tables[0].table.id, "a");
    assert_eq!(tables[1].position, 2);
}

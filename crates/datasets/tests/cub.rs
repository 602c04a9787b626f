use std::fs;
use std::path::Path;

use datasets::cub::Cub200_2011;
use datasets::{FgvcDataset, Split};

const BASE: &str = "CUB_200_2011/CUB_200_2011";

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Two classes, three images; image 2 is the only test image.
fn fixture(root: &Path) {
    for class in ["001.Black_footed_Albatross", "002.Laysan_Albatross"] {
        fs::create_dir_all(root.join(BASE).join("images").join(class)).unwrap();
    }
    write(root, &format!("{}/classes.txt", BASE), "1 001.Black_footed_Albatross\n2 002.Laysan_Albatross\n");
    write(
        root,
        &format!("{}/images.txt", BASE),
        "1 001.Black_footed_Albatross/a_0001.jpg\n\
         2 001.Black_footed_Albatross/a_0002.jpg\n\
         3 002.Laysan_Albatross/l_0001.jpg\n",
    );
    write(root, &format!("{}/train_test_split.txt", BASE), "1 1\n2 0\n3 1\n");
}

#[test]
fn train_split_keeps_only_flagged_images() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path());

    let train = Cub200_2011::new(dir.path(), Split::Train, false).unwrap();

    assert_eq!(train.len(), 2);
    let names: Vec<_> = train
        .samples()
        .iter()
        .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a_0001.jpg", "l_0001.jpg"]);
    assert_eq!(train.labels(), vec![0, 1]);
}

#[test]
fn test_split_and_category_lookup() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path());

    let test = Cub200_2011::new(dir.path(), Split::Test, false).unwrap();

    assert_eq!(test.len(), 1);
    assert_eq!(test.get(0).unwrap().label, 0);
    assert_eq!(test.categories().len(), 2);
    assert_eq!(test.encode_category("Laysan_Albatross"), Some(1));
    assert_eq!(test.decode_category(0), Some("Black_footed_Albatross"));
    assert_eq!(test.decode_category(7), None);
}

#[test]
fn class_list_follows_classes_file() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path());

    let classes = datasets::cub::read_class_list(dir.path()).unwrap();

    assert_eq!(classes[1], (1, "Laysan_Albatross".to_string()));
}

#[test]
fn malformed_manifest_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path());
    write(dir.path(), &format!("{}/train_test_split.txt", BASE), "1 1\n2\n");

    assert!(Cub200_2011::new(dir.path(), Split::Train, false).is_err());
}

#[test]
fn existing_extraction_skips_download() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path());

    // No network access happens because the extracted directory exists.
    let dataset = Cub200_2011::new(dir.path(), Split::Train, true).unwrap();
    assert_eq!(dataset.len(), 2);
}

use rand::{seq::SliceRandom, Rng};

const CHROME_VERSIONS: &[&str] = &[
    "116.0.5845.172",
    "117.0.5938.154",
    "118.0.5993.112",
    "119.0.6045.194",
    "120.0.6099.230",
    "121.0.6167.178",
    "122.0.6261.119",
    "123.0.6312.99",
    "124.0.6367.179",
];

const ANDROID_VERSIONS: &[&str] = &["10", "11", "12", "13", "14"];

const ANDROID_DEVICES: &[&str] = &[
    "SM-G991B",
    "SM-G998B",
    "SM-A525F",
    "SM-N986B",
    "Pixel 6",
    "Pixel 7",
    "Pixel 7 Pro",
    "Mi 11",
    "Redmi Note 12",
    "POCO F5",
    "CPH2423",
];

const IOS_VERSIONS: &[&str] = &["15_0", "16_0", "17_0"];

/// Random mobile browser user agent. The game is a Telegram web app, so
/// only phone profiles are produced.
pub fn random_user_agent<R: Rng + ?Sized>(rng: &mut R) -> String {
    let chrome = CHROME_VERSIONS.choose(rng).copied().unwrap_or("120.0.6099.230");

    if rng.gen_bool(0.75) {
        let android = ANDROID_VERSIONS.choose(rng).copied().unwrap_or("13");
        let device = ANDROID_DEVICES.choose(rng).copied().unwrap_or("Pixel 7");

        format!(
            "Mozilla/5.0 (Linux; Android {}; {}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Mobile Safari/537.36",
            android, device, chrome
        )
    } else {
        let ios = IOS_VERSIONS.choose(rng).copied().unwrap_or("17_0");

        format!(
            "Mozilla/5.0 (iPhone; CPU iPhone OS {} like Mac OS X) AppleWebKit/537.36 (KHTML, like Gecko) CriOS/{} Mobile/15E148 Safari/604.1",
            ios, chrome
        )
    }
}

//! Field allow-lists of the source site's search and detail forms.

pub const SEARCH_SINGLE_FIELDS: &[&str] = &[
    "adLimitation",
    "airbag",
    "ambit-search-radius",
    "av",
    "climatisation",
    "cn",
    "damageUnrepaired",
    "daysAfterCreation",
    "doorCount",
    "emissionClass",
    "emissionsSticker",
    "export",
    "grossPrice",
    "isSearchRequest",
    "lang",
    "makeModelVariant1.makeId",
    "makeModelVariant1.modelDescription",
    "makeModelVariant1.modelId",
    "makeModelVariant2.makeId",
    "makeModelVariant2.modelDescription",
    "makeModelVariant2.modelId",
    "makeModelVariantExclusions[0].makeId",
    "makeModelVariantExclusions[0].modelId",
    "maxBatteryCapacity",
    "maxConsumptionCombined",
    "maxCubicCapacity",
    "maxFirstRegistrationDate",
    "maxMileage",
    "maxPrice",
    "maxSeats",
    "minBatteryCapacity",
    "minCubicCapacity",
    "minFirstRegistrationDate",
    "minHu",
    "minMileage",
    "minPrice",
    "minSeats",
    "ms",
    "null",
    "numberOfPreviousOwners",
    "od",
    "pageNumber",
    "readyToDrive",
    "sb",
    "scopeId",
    "sfmr",
    "sld",
    "sortOption.sortBy",
    "sortOption.sortOrder",
    "spc",
    "sr",
    "sset",
    "ssid",
    "tct",
    "usedCarSeals",
    "vatable",
    "withImage",
];

pub const SEARCH_MULTI_FIELDS: &[&str] = &[
    "bat",
    "bds",
    "blt",
    "categories",
    "colors",
    "drl",
    "features",
    "fuels",
    "hlt",
    "interiorColors",
    "interiorTypes",
    "maxPowerAsArray",
    "minPowerAsArray",
    "parkAssistents",
    "rad",
    "redPencil",
    "transmissions",
    "usage",
    "usageType",
    "videoEnabled",
];

/// Single-valued fields only the detail page understands
pub const DETAIL_ONLY_SINGLE_FIELDS: &[&str] = &["id", "fnai", "searchId", "action"];
